use byteorder::{ByteOrder, LittleEndian};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{Page, Rid, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;

// Node page layout:
//   [0]      is_leaf: u8
//   [1..5)   parent page id: u32
//   [5..9)   next leaf page id: u32 (the invalid sentinel for internals)
//   [9..11)  key count: u16
//   [11..13) value/child count: u16
//   [13..)   keys (u16 length prefix + bincode bytes each),
//            then values (page_id u32, slot u32) or children (u32)
const HEADER_SIZE: usize = 13;

/// Serialize a node into a page buffer
pub fn encode_node<K>(node: &BTreeNode<K>, page: &mut Page) -> Result<(), BTreeError>
where
    K: Serialize + Clone + Ord,
{
    page.data.fill(0);
    page.data[0] = u8::from(node.is_leaf);
    LittleEndian::write_u32(&mut page.data[1..5], node.parent);
    LittleEndian::write_u32(&mut page.data[5..9], node.next_leaf);
    LittleEndian::write_u16(&mut page.data[9..11], node.keys.len() as u16);
    let payload_count = if node.is_leaf {
        node.values.len()
    } else {
        node.children.len()
    };
    LittleEndian::write_u16(&mut page.data[11..13], payload_count as u16);

    let mut offset = HEADER_SIZE;
    for key in &node.keys {
        let key_bytes = bincode::serialize(key)
            .map_err(|e| BTreeError::SerializationError(e.to_string()))?;
        if offset + 2 + key_bytes.len() > PAGE_SIZE {
            return Err(BTreeError::NodeTooLarge);
        }
        LittleEndian::write_u16(&mut page.data[offset..offset + 2], key_bytes.len() as u16);
        offset += 2;
        page.data[offset..offset + key_bytes.len()].copy_from_slice(&key_bytes);
        offset += key_bytes.len();
    }

    if node.is_leaf {
        for value in &node.values {
            if offset + 8 > PAGE_SIZE {
                return Err(BTreeError::NodeTooLarge);
            }
            LittleEndian::write_u32(&mut page.data[offset..offset + 4], value.page_id);
            LittleEndian::write_u32(&mut page.data[offset + 4..offset + 8], value.slot_num);
            offset += 8;
        }
    } else {
        for &child in &node.children {
            if offset + 4 > PAGE_SIZE {
                return Err(BTreeError::NodeTooLarge);
            }
            LittleEndian::write_u32(&mut page.data[offset..offset + 4], child);
            offset += 4;
        }
    }

    Ok(())
}

/// Deserialize a node out of a page buffer
pub fn decode_node<K>(page: &Page) -> Result<BTreeNode<K>, BTreeError>
where
    K: DeserializeOwned + Clone + Ord,
{
    let is_leaf = match page.data[0] {
        0 => false,
        1 => true,
        _ => return Err(BTreeError::InvalidPageFormat),
    };
    let parent = LittleEndian::read_u32(&page.data[1..5]);
    let next_leaf = LittleEndian::read_u32(&page.data[5..9]);
    let key_count = LittleEndian::read_u16(&page.data[9..11]) as usize;
    let payload_count = LittleEndian::read_u16(&page.data[11..13]) as usize;

    let mut node = if is_leaf {
        BTreeNode::new_leaf()
    } else {
        BTreeNode::new_internal()
    };
    node.parent = parent;
    node.next_leaf = next_leaf;

    let mut offset = HEADER_SIZE;
    node.keys.reserve(key_count);
    for _ in 0..key_count {
        if offset + 2 > PAGE_SIZE {
            return Err(BTreeError::InvalidPageFormat);
        }
        let len = LittleEndian::read_u16(&page.data[offset..offset + 2]) as usize;
        offset += 2;
        if offset + len > PAGE_SIZE {
            return Err(BTreeError::InvalidPageFormat);
        }
        let key = bincode::deserialize(&page.data[offset..offset + len])
            .map_err(|e| BTreeError::DeserializationError(e.to_string()))?;
        node.keys.push(key);
        offset += len;
    }

    if is_leaf {
        node.values.reserve(payload_count);
        for _ in 0..payload_count {
            if offset + 8 > PAGE_SIZE {
                return Err(BTreeError::InvalidPageFormat);
            }
            let page_id = LittleEndian::read_u32(&page.data[offset..offset + 4]);
            let slot_num = LittleEndian::read_u32(&page.data[offset + 4..offset + 8]);
            node.values.push(Rid::new(page_id, slot_num));
            offset += 8;
        }
    } else {
        node.children.reserve(payload_count);
        for _ in 0..payload_count {
            if offset + 4 > PAGE_SIZE {
                return Err(BTreeError::InvalidPageFormat);
            }
            node.children
                .push(LittleEndian::read_u32(&page.data[offset..offset + 4]));
            offset += 4;
        }
    }

    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::INVALID_PAGE_ID;
    use crate::index::key::GenericKey;

    #[test]
    fn test_leaf_round_trip() {
        let mut leaf: BTreeNode<i64> = BTreeNode::new_leaf();
        leaf.parent = 7;
        leaf.next_leaf = 12;
        for i in 0..40i64 {
            leaf.leaf_insert(i * 3, Rid::new(i as u32, (i * 2) as u32));
        }

        let mut page = Page::new(5);
        encode_node(&leaf, &mut page).unwrap();
        let decoded: BTreeNode<i64> = decode_node(&page).unwrap();

        assert!(decoded.is_leaf);
        assert_eq!(decoded.parent, 7);
        assert_eq!(decoded.next_leaf, 12);
        assert_eq!(decoded.keys, leaf.keys);
        assert_eq!(decoded.values, leaf.values);
    }

    #[test]
    fn test_internal_round_trip() {
        let mut node: BTreeNode<GenericKey<8>> = BTreeNode::new_internal();
        node.parent = INVALID_PAGE_ID;
        node.children = vec![3, 9, 14, 21];
        node.keys = vec![
            GenericKey::from_u64(100),
            GenericKey::from_u64(200),
            GenericKey::from_u64(300),
        ];

        let mut page = Page::new(2);
        encode_node(&node, &mut page).unwrap();
        let decoded: BTreeNode<GenericKey<8>> = decode_node(&page).unwrap();

        assert!(!decoded.is_leaf);
        assert!(decoded.is_root());
        assert_eq!(decoded.children, node.children);
        assert_eq!(decoded.keys, node.keys);
    }

    #[test]
    fn test_empty_leaf_round_trip() {
        let leaf: BTreeNode<i32> = BTreeNode::new_leaf();
        let mut page = Page::new(1);
        encode_node(&leaf, &mut page).unwrap();
        let decoded: BTreeNode<i32> = decode_node(&page).unwrap();
        assert!(decoded.is_leaf);
        assert!(decoded.keys.is_empty());
        assert_eq!(decoded.next_leaf, INVALID_PAGE_ID);
    }
}
