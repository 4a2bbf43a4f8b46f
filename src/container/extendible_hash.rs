use std::hash::{Hash, Hasher};
use parking_lot::RwLock;

/// Hasher that keeps the raw bits of the last integer written.
///
/// Small integer keys index the directory by their own low bits, which keeps
/// bucket placement predictable for page ids.
#[derive(Default)]
pub struct IdentityHasher {
    state: u64,
}

impl Hasher for IdentityHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        let mut buf = [0u8; 8];
        let len = bytes.len().min(8);
        buf[..len].copy_from_slice(&bytes[..len]);
        self.state = u64::from_le_bytes(buf);
    }

    fn write_u32(&mut self, i: u32) {
        self.state = i as u64;
    }

    fn write_u64(&mut self, i: u64) {
        self.state = i;
    }

    fn write_i32(&mut self, i: i32) {
        self.state = i as u32 as u64;
    }

    fn write_usize(&mut self, i: usize) {
        self.state = i as u64;
    }
}

struct Bucket<K, V> {
    depth: usize,
    items: Vec<(K, V)>,
}

impl<K: PartialEq, V> Bucket<K, V> {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            items: Vec::new(),
        }
    }

    fn find(&self, key: &K) -> Option<&V> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn remove(&mut self, key: &K) -> bool {
        if let Some(pos) = self.items.iter().position(|(k, _)| k == key) {
            self.items.remove(pos);
            true
        } else {
            false
        }
    }

    fn update(&mut self, key: &K, value: &V) -> bool
    where
        V: Clone,
    {
        for (k, v) in self.items.iter_mut() {
            if k == key {
                *v = value.clone();
                return true;
            }
        }
        false
    }
}

struct HashTableCore<K, V> {
    global_depth: usize,
    num_buckets: usize,
    /// Directory slot -> index into `buckets`; aliased slots share an index
    dir: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

/// Extendible hash table used as the buffer pool's page directory.
///
/// The directory is indexed by the low `global_depth` bits of the key hash.
/// Growth doubles the directory and splits only the overflowing bucket, so
/// resident entries are never rehashed wholesale. A single reader-writer
/// latch over the whole structure serializes splits against lookups.
pub struct ExtendibleHashTable<K, V> {
    core: RwLock<HashTableCore<K, V>>,
    bucket_size: usize,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + PartialEq + Clone,
    V: Clone,
{
    pub fn new(bucket_size: usize) -> Self {
        Self {
            core: RwLock::new(HashTableCore {
                global_depth: 0,
                num_buckets: 1,
                dir: vec![0],
                buckets: vec![Bucket::new(0)],
            }),
            bucket_size,
        }
    }

    fn hash(key: &K) -> u64 {
        let mut hasher = IdentityHasher::default();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn index_of(global_depth: usize, key: &K) -> usize {
        let mask = (1usize << global_depth) - 1;
        (Self::hash(key) as usize) & mask
    }

    /// Look up the value stored under `key`
    pub fn find(&self, key: &K) -> Option<V> {
        let core = self.core.read();
        let slot = Self::index_of(core.global_depth, key);
        core.buckets[core.dir[slot]].find(key).cloned()
    }

    /// Remove `key`, returning whether it was present
    pub fn remove(&self, key: &K) -> bool {
        let mut core = self.core.write();
        let slot = Self::index_of(core.global_depth, key);
        let bucket = core.dir[slot];
        core.buckets[bucket].remove(key)
    }

    /// Insert or overwrite the entry for `key`, splitting buckets and
    /// doubling the directory as needed
    pub fn insert(&self, key: &K, value: &V) {
        let mut core = self.core.write();
        let slot = Self::index_of(core.global_depth, key);
        let bucket = core.dir[slot];
        if core.buckets[bucket].update(key, value) {
            return;
        }

        loop {
            let slot = Self::index_of(core.global_depth, key);
            let target = core.dir[slot];
            if core.buckets[target].items.len() < self.bucket_size {
                break;
            }

            // Full bucket at maximum depth: double the directory, mirroring
            // each new slot off the slot given by its low global-depth bits.
            if core.buckets[target].depth == core.global_depth {
                let old_len = core.dir.len();
                core.global_depth += 1;
                for i in 0..old_len {
                    let mirrored = core.dir[i];
                    core.dir.push(mirrored);
                }
            }

            // Split the overflowing bucket on its next depth bit.
            let depth = core.buckets[target].depth;
            let mask = 1usize << depth;
            let items = std::mem::take(&mut core.buckets[target].items);

            let mut zero_bucket = Bucket::new(depth + 1);
            let mut one_bucket = Bucket::new(depth + 1);
            for (k, v) in items {
                if (Self::hash(&k) as usize) & mask != 0 {
                    one_bucket.items.push((k, v));
                } else {
                    zero_bucket.items.push((k, v));
                }
            }

            core.buckets[target] = zero_bucket;
            core.buckets.push(one_bucket);
            let one_index = core.buckets.len() - 1;
            core.num_buckets += 1;

            for i in 0..core.dir.len() {
                if core.dir[i] == target && (i & mask) != 0 {
                    core.dir[i] = one_index;
                }
            }
        }

        let slot = Self::index_of(core.global_depth, key);
        let bucket = core.dir[slot];
        core.buckets[bucket].items.push((key.clone(), value.clone()));
    }

    /// Directory depth in bits
    pub fn global_depth(&self) -> usize {
        self.core.read().global_depth
    }

    /// Depth of the bucket behind a directory slot
    pub fn local_depth(&self, dir_index: usize) -> usize {
        let core = self.core.read();
        core.buckets[core.dir[dir_index]].depth
    }

    /// Number of distinct buckets
    pub fn num_buckets(&self) -> usize {
        self.core.read().num_buckets
    }

    /// Snapshot of every stored value
    pub fn values(&self) -> Vec<V> {
        let core = self.core.read();
        let mut seen = vec![false; core.buckets.len()];
        let mut out = Vec::new();
        for &bucket in &core.dir {
            if !seen[bucket] {
                seen[bucket] = true;
                out.extend(core.buckets[bucket].items.iter().map(|(_, v)| v.clone()));
            }
        }
        out
    }

    /// Snapshot of every stored key
    pub fn keys(&self) -> Vec<K> {
        let core = self.core.read();
        let mut seen = vec![false; core.buckets.len()];
        let mut out = Vec::new();
        for &bucket in &core.dir {
            if !seen[bucket] {
                seen[bucket] = true;
                out.extend(core.buckets[bucket].items.iter().map(|(k, _)| k.clone()));
            }
        }
        out
    }
}
