use std::marker::PhantomData;
use std::sync::Arc;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::common::types::{PageId, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::latch::{LatchContext, PageReadGuard, PageWriteGuard, PathEntry};
use crate::index::btree::node::BTreeNode;
use crate::index::btree::serialization::{decode_node, encode_node};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::HeaderPage;

/// Whether a crab descent is proving safety for an insert or a delete
#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOp {
    Insert,
    Delete,
}

/// Concurrent B+ tree index over the buffer pool.
///
/// Every node lives on exactly one page. Readers crab down with read
/// latches; writers crab with write latches and keep ancestors only while a
/// split or merge might propagate into them. The root pointer has its own
/// latch and is mirrored into the header page whenever it changes.
pub struct BPlusTree<K> {
    pub(crate) index_name: String,
    pub(crate) buffer_pool: Arc<BufferPoolManager>,
    pub(crate) root_page_id: RwLock<PageId>,
    pub(crate) leaf_max_size: usize,
    pub(crate) internal_max_size: usize,
    pub(crate) _phantom: PhantomData<K>,
}

impl<K> BPlusTree<K>
where
    K: Clone + Ord + Serialize + DeserializeOwned,
{
    /// Open (or register) the index named `name`.
    ///
    /// The root pointer is recovered from the header page if a record
    /// already exists; otherwise a fresh empty record is written. The first
    /// insert creates the root.
    pub fn new(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        assert!(leaf_max_size >= 3, "leaf nodes need room to split");
        assert!(internal_max_size >= 3, "internal nodes need room to split");

        let index_name = name.into();
        let header = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let root_page_id = {
            let mut page = header.write();
            match HeaderPage::find_record(&page, &index_name) {
                Some(root_id) => {
                    buffer_pool.unpin_page(HEADER_PAGE_ID, false)?;
                    root_id
                }
                None => {
                    HeaderPage::insert_record(&mut page, &index_name, INVALID_PAGE_ID);
                    drop(page);
                    buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;
                    INVALID_PAGE_ID
                }
            }
        };

        Ok(Self {
            index_name,
            buffer_pool,
            root_page_id: RwLock::new(root_page_id),
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.index_name
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.read()
    }

    /// A split leaves `floor(max/2)` entries on the right half, so that is
    /// the smallest legal non-root leaf.
    pub(crate) fn leaf_min_size(&self) -> usize {
        self.leaf_max_size / 2
    }

    pub(crate) fn internal_min_size(&self) -> usize {
        (self.internal_max_size + 1) / 2
    }

    /// Point lookup, crabbing down with read latches
    pub fn get(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let root_latch = self.root_page_id.read();
        let root_id = *root_latch;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }

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
                let result = node.lookup(key);
                drop(guard);
                self.buffer_pool.unpin_page(current_id, false)?;
                return Ok(result);
            }

            let child_id = node.children[node.child_index_for(key)];
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

    /// Write-latching crab descent. The returned context's last path entry
    /// is the target leaf; ancestors above the deepest unsafe node have
    /// already been released.
    pub(crate) fn descend_for_write<'a>(
        &'a self,
        key: &K,
        op: WriteOp,
        root_guard: parking_lot::RwLockWriteGuard<'a, PageId>,
    ) -> Result<LatchContext<'a, K>, BTreeError> {
        let mut ctx = LatchContext::new(&self.buffer_pool, root_guard);
        let mut current_id = **ctx.root_guard.as_ref().expect("fresh context holds the root latch");

        loop {
            let page = self.buffer_pool.fetch_page(current_id)?;
            let guard: PageWriteGuard = page.write_arc();
            let node = match decode_node::<K>(&guard) {
                Ok(node) => node,
                Err(e) => {
                    drop(guard);
                    let _ = self.buffer_pool.unpin_page(current_id, false);
                    return Err(e);
                }
            };

            if self.is_safe(&node, op) {
                ctx.release_ancestors();
            }

            let next = if node.is_leaf {
                None
            } else {
                Some(node.children[node.child_index_for(key)])
            };
            ctx.path.push(PathEntry {
                page_id: current_id,
                guard,
                node,
            });

            match next {
                Some(child_id) => current_id = child_id,
                None => return Ok(ctx),
            }
        }
    }

    /// A node is safe when the operation cannot propagate past it
    fn is_safe(&self, node: &BTreeNode<K>, op: WriteOp) -> bool {
        match op {
            WriteOp::Insert => {
                if node.is_leaf {
                    node.keys.len() < self.leaf_max_size - 1
                } else {
                    node.children.len() < self.internal_max_size
                }
            }
            WriteOp::Delete => {
                if node.is_root() {
                    // The root only changes when an empty leaf root dies or
                    // an internal root drops to a single child.
                    if node.is_leaf {
                        node.keys.len() > 1
                    } else {
                        node.children.len() > 2
                    }
                } else if node.is_leaf {
                    node.keys.len() > self.leaf_min_size()
                } else {
                    node.children.len() > self.internal_min_size()
                }
            }
        }
    }

    /// Rewrite a child's parent pointer under a brief latch
    pub(crate) fn set_parent_pointer(
        &self,
        child_id: PageId,
        parent_id: PageId,
    ) -> Result<(), BTreeError> {
        let page = self.buffer_pool.fetch_page(child_id)?;
        {
            let mut guard = page.write();
            let mut node = decode_node::<K>(&guard)?;
            node.parent = parent_id;
            encode_node(&node, &mut guard)?;
        }
        self.buffer_pool.unpin_page(child_id, true)?;
        Ok(())
    }

    /// Mirror a root change into the header page. Callers hold the root
    /// latch across this so readers never see a stale record.
    pub(crate) fn update_root_record(&self, root_id: PageId) -> Result<(), BTreeError> {
        let header = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut page = header.write();
            if !HeaderPage::update_record(&mut page, &self.index_name, root_id) {
                HeaderPage::insert_record(&mut page, &self.index_name, root_id);
            }
        }
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true)?;
        Ok(())
    }
}
