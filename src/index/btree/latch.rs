use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLockWriteGuard};

use crate::common::types::{Page, PageId};
use crate::index::btree::node::BTreeNode;
use crate::storage::buffer::BufferPoolManager;

/// Owned read latch on a page
pub(crate) type PageReadGuard = ArcRwLockReadGuard<RawRwLock, Page>;

/// Owned write latch on a page
pub(crate) type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;

/// One latched node on the descent path
pub(crate) struct PathEntry<K> {
    pub page_id: PageId,
    pub guard: PageWriteGuard,
    pub node: BTreeNode<K>,
}

/// Latches held by one insert/delete while it crabs down the tree.
///
/// `root_guard` is the latch on the root pointer itself (the stack
/// sentinel); `path` holds the write-latched pages from the root down, oldest
/// first. When a child proves safe the whole ancestor set unwinds top-down
/// and the pages unpin clean. Whatever is still held when the operation ends
/// is released on drop.
pub(crate) struct LatchContext<'a, K> {
    pool: &'a BufferPoolManager,
    pub root_guard: Option<RwLockWriteGuard<'a, PageId>>,
    pub path: Vec<PathEntry<K>>,
}

impl<'a, K> LatchContext<'a, K> {
    pub fn new(pool: &'a BufferPoolManager, root_guard: RwLockWriteGuard<'a, PageId>) -> Self {
        Self {
            pool,
            root_guard: Some(root_guard),
            path: Vec::new(),
        }
    }

    /// Release every held ancestor latch in FIFO order and unpin the pages.
    ///
    /// Only called for pages whose bytes have not changed; modified pages
    /// are encoded and unpinned dirty by the operation itself.
    pub fn release_ancestors(&mut self) {
        self.root_guard = None;
        for entry in self.path.drain(..) {
            let PathEntry { page_id, guard, .. } = entry;
            drop(guard);
            if let Err(e) = self.pool.unpin_page(page_id, false) {
                log::error!("failed to unpin page {} during latch release: {}", page_id, e);
            }
        }
    }
}

impl<K> Drop for LatchContext<'_, K> {
    fn drop(&mut self) {
        self.release_ancestors();
    }
}
