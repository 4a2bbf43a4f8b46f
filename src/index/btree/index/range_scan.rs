use std::marker::PhantomData;
use std::sync::Arc;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::latch::PageReadGuard;
use crate::index::btree::serialization::decode_node;
use crate::storage::buffer::BufferPoolManager;
use super::base::BPlusTree;

/// Lazy forward cursor over the leaf chain.
///
/// The cursor holds no latches between steps: each `next` fetches the
/// current leaf under a read latch just long enough to copy one pair, and
/// stepping off a leaf's end re-latches the successor to cache its size and
/// next pointer. The end sentinel is the invalid leaf id.
pub struct BTreeIterator<K> {
    buffer_pool: Arc<BufferPoolManager>,
    leaf_id: PageId,
    index: usize,
    size: usize,
    next_id: PageId,
    _phantom: PhantomData<K>,
}

impl<K> BTreeIterator<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned,
{
    pub(crate) fn new(
        buffer_pool: Arc<BufferPoolManager>,
        leaf_id: PageId,
        index: usize,
        size: usize,
        next_id: PageId,
    ) -> Self {
        Self {
            buffer_pool,
            leaf_id,
            index,
            size,
            next_id,
            _phantom: PhantomData,
        }
    }

    pub(crate) fn end_sentinel(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self::new(buffer_pool, INVALID_PAGE_ID, 0, 0, INVALID_PAGE_ID)
    }

    pub fn is_end(&self) -> bool {
        self.leaf_id == INVALID_PAGE_ID
    }

    fn finish(&mut self) {
        self.leaf_id = INVALID_PAGE_ID;
        self.index = 0;
        self.size = 0;
        self.next_id = INVALID_PAGE_ID;
    }

    /// Move to the cached successor leaf, refreshing the cached size and
    /// next pointer under its read latch
    fn advance_leaf(&mut self) {
        self.leaf_id = self.next_id;
        self.index = 0;
        if self.leaf_id == INVALID_PAGE_ID {
            self.finish();
            return;
        }

        let Ok(page) = self.buffer_pool.fetch_page(self.leaf_id) else {
            self.finish();
            return;
        };
        let leaf_id = self.leaf_id;
        {
            let guard = page.read();
            match decode_node::<K>(&guard) {
                Ok(node) => {
                    self.size = node.keys.len();
                    self.next_id = node.next_leaf;
                }
                Err(_) => self.finish(),
            }
        }
        let _ = self.buffer_pool.unpin_page(leaf_id, false);
    }
}

impl<K> Iterator for BTreeIterator<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned,
{
    type Item = (K, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        if self.is_end() {
            return None;
        }

        let page = self.buffer_pool.fetch_page(self.leaf_id).ok()?;
        let copied = {
            let guard = page.read();
            match decode_node::<K>(&guard) {
                Ok(node) if self.index < node.keys.len() => {
                    Some((node.keys[self.index].clone(), node.values[self.index]))
                }
                _ => None,
            }
        };
        let _ = self.buffer_pool.unpin_page(self.leaf_id, false);

        let Some(pair) = copied else {
            self.finish();
            return None;
        };

        self.index += 1;
        if self.index >= self.size {
            self.advance_leaf();
        }
        Some(pair)
    }
}

impl<K> PartialEq for BTreeIterator<K> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.buffer_pool, &other.buffer_pool)
            && self.leaf_id == other.leaf_id
            && self.index == other.index
    }
}

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned,
{
    /// Cursor positioned at the smallest key
    pub fn iter(&self) -> Result<BTreeIterator<K>, BTreeError> {
        self.make_iterator(None)
    }

    /// Cursor positioned at the first entry >= `start_key`
    pub fn iter_from(&self, start_key: &K) -> Result<BTreeIterator<K>, BTreeError> {
        self.make_iterator(Some(start_key))
    }

    /// The past-the-end cursor
    pub fn end(&self) -> BTreeIterator<K> {
        BTreeIterator::end_sentinel(Arc::clone(&self.buffer_pool))
    }

    fn make_iterator(&self, start_key: Option<&K>) -> Result<BTreeIterator<K>, BTreeError> {
        let root_latch = self.root_page_id.read();
        let root_id = *root_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(BTreeIterator::end_sentinel(Arc::clone(&self.buffer_pool)));
        }

        // Read-crab to the target leaf: leftmost, or the one covering the
        // start key.
        let mut current_id = root_id;
        let page = self.buffer_pool.fetch_page(current_id)?;
        let mut guard: PageReadGuard = page.read_arc();
        drop(root_latch);

        loop {
            let node = match decode_node::<K>(&guard) {
                Ok(node) => node,
                Err(e) => {
                    drop(guard);
                    let _ = self.buffer_pool.unpin_page(current_id, false);
                    return Err(e);
                }
            };

            if node.is_leaf {
                let index = match start_key {
                    None => 0,
                    Some(key) => match node.keys.binary_search(key) {
                        Ok(i) => i,
                        Err(i) => i,
                    },
                };
                let mut iter = BTreeIterator::new(
                    Arc::clone(&self.buffer_pool),
                    current_id,
                    index,
                    node.keys.len(),
                    node.next_leaf,
                );
                drop(guard);
                self.buffer_pool.unpin_page(current_id, false)?;
                // Starting past the last entry means the scan begins on the
                // next leaf.
                if index >= iter.size {
                    iter.advance_leaf();
                }
                return Ok(iter);
            }

            let child_id = match start_key {
                None => node.children[0],
                Some(key) => node.children[node.child_index_for(key)],
            };
            let child_page = match self.buffer_pool.fetch_page(child_id) {
                Ok(page) => page,
                Err(e) => {
                    drop(guard);
                    let _ = self.buffer_pool.unpin_page(current_id, false);
                    return Err(e.into());
                }
            };
            let child_guard = child_page.read_arc();
            drop(guard);
            self.buffer_pool.unpin_page(current_id, false)?;
            current_id = child_id;
            guard = child_guard;
        }
    }
}
