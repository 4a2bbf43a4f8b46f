use std::fmt;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Fixed-width index key of `N` bytes.
///
/// Keys compare as big-endian byte strings, so integer key attributes must
/// be encoded big-endian (see `from_u64`). The catalog erases the concrete
/// width behind `AnyIndex`, which covers N in {4, 8, 16, 32, 64}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenericKey<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> GenericKey<N> {
    pub fn new(data: [u8; N]) -> Self {
        Self { data }
    }

    pub fn zeroed() -> Self {
        Self { data: [0; N] }
    }

    /// Build a key from the prefix bytes of `slice`, zero-padded on the right
    pub fn from_slice(slice: &[u8]) -> Self {
        let mut data = [0; N];
        let len = slice.len().min(N);
        data[..len].copy_from_slice(&slice[..len]);
        Self { data }
    }

    /// Encode an integer so that numeric order matches byte order
    pub fn from_u64(value: u64) -> Self {
        let mut data = [0; N];
        let bytes = value.to_be_bytes();
        let len = bytes.len().min(N);
        data[N - len..].copy_from_slice(&bytes[bytes.len() - len..]);
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.data
    }
}

impl<const N: usize> Serialize for GenericKey<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.data)
    }
}

struct GenericKeyVisitor<const N: usize>;

impl<'de, const N: usize> Visitor<'de> for GenericKeyVisitor<N> {
    type Value = GenericKey<N>;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "{} key bytes", N)
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        if v.len() != N {
            return Err(E::invalid_length(v.len(), &self));
        }
        Ok(GenericKey::from_slice(v))
    }

    fn visit_seq<A: de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut data = [0; N];
        for (i, byte) in data.iter_mut().enumerate() {
            *byte = seq
                .next_element()?
                .ok_or_else(|| de::Error::invalid_length(i, &self))?;
        }
        Ok(GenericKey::new(data))
    }
}

impl<'de, const N: usize> Deserialize<'de> for GenericKey<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_bytes(GenericKeyVisitor::<N>)
    }
}
