use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::container::ExtendibleHashTable;
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;

/// Bucket capacity of the page directory
const DIRECTORY_BUCKET_SIZE: usize = 4;

/// Frame bookkeeping: the page it holds plus pin/dirty state.
///
/// Pin counts and dirty flags are only touched under the pool mutex; the
/// page's own latch stays free for callers.
struct FrameMeta {
    page: PagePtr,
    pin_count: u32,
    is_dirty: bool,
}

struct PoolCore {
    frames: Vec<FrameMeta>,
    free_list: VecDeque<FrameId>,
}

/// Buffer pool manager: owns the frame array, the free list, the LRU-K
/// replacer, and the page directory, and mediates all disk I/O.
///
/// A frame is in exactly one of three states: on the free list, pinned
/// (pin count > 0), or evictable in the replacer. Every mutating operation
/// serializes on a single pool mutex; fine-grained concurrency is the
/// caller's business via per-page latches.
pub struct BufferPoolManager {
    pool_size: usize,
    core: Mutex<PoolCore>,
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        replacer_k: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_disk_manager(pool_size, replacer_k, disk_manager))
    }

    pub fn with_disk_manager(
        pool_size: usize,
        replacer_k: usize,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            frames.push(FrameMeta {
                page: Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))),
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(i as FrameId);
        }

        Self {
            pool_size,
            core: Mutex::new(PoolCore { frames, free_list }),
            page_table: ExtendibleHashTable::new(DIRECTORY_BUCKET_SIZE),
            replacer: LruKReplacer::new(pool_size, replacer_k),
            disk_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a fresh page and pin it in a frame.
    ///
    /// The frame is claimed before the page id is allocated, so a full pool
    /// does not burn ids.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut core = self.core.lock();
        let frame_id = self.acquire_frame(&mut core)?;

        let page_id = self.disk_manager.allocate_page();
        {
            let frame = &mut core.frames[frame_id as usize];
            let mut page = frame.page.write();
            page.reset();
            page.page_id = page_id;
            frame.pin_count = 1;
            frame.is_dirty = false;
        }

        self.page_table.insert(&page_id, &frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Ok((Arc::clone(&core.frames[frame_id as usize].page), page_id))
    }

    /// Fetch a page, reading it from disk on a cache miss
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page id".to_string(),
            ));
        }

        let mut core = self.core.lock();

        if let Some(frame_id) = self.page_table.find(&page_id) {
            let frame = &mut core.frames[frame_id as usize];
            frame.pin_count += 1;
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(Arc::clone(&frame.page));
        }

        let frame_id = self.acquire_frame(&mut core)?;
        {
            let frame = &mut core.frames[frame_id as usize];
            let mut page = frame.page.write();
            if let Err(e) = self.disk_manager.read_page(page_id, &mut page) {
                // The claimed frame goes back on the free list; its old
                // directory entry is already gone.
                drop(page);
                core.free_list.push_back(frame_id);
                return Err(e.into());
            }
            frame.pin_count = 1;
            frame.is_dirty = false;
        }

        self.page_table.insert(&page_id, &frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);

        Ok(Arc::clone(&core.frames[frame_id as usize].page))
    }

    /// Drop one pin on a page, or-accumulating the dirty flag.
    ///
    /// The frame becomes evictable when the pin count reaches zero.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut core = self.core.lock();
        let frame_id = self
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let frame = &mut core.frames[frame_id as usize];
        if frame.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }
        frame.pin_count -= 1;
        frame.is_dirty |= is_dirty;
        if frame.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }

        Ok(())
    }

    /// Synchronously write a resident page to disk and clear its dirty flag
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut core = self.core.lock();
        let frame_id = self
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;
        self.flush_frame(&mut core, frame_id)
    }

    /// Flush every resident page
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut core = self.core.lock();
        for page_id in self.page_table.keys() {
            let frame_id = self
                .page_table
                .find(&page_id)
                .expect("directory key vanished under the pool mutex");
            self.flush_frame(&mut core, frame_id)?;
        }
        Ok(())
    }

    /// Drop a page from the pool and return its id to the allocator.
    ///
    /// A pinned page cannot be deleted; a non-resident page is a no-op.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut core = self.core.lock();
        let Some(frame_id) = self.page_table.find(&page_id) else {
            return Ok(());
        };

        {
            let frame = &mut core.frames[frame_id as usize];
            if frame.pin_count > 0 {
                return Err(BufferPoolError::PagePinned(page_id));
            }
            let mut page = frame.page.write();
            page.reset();
            page.page_id = INVALID_PAGE_ID;
            frame.is_dirty = false;
        }

        self.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        core.free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);

        Ok(())
    }

    /// Claim a frame from the free list, or evict a victim.
    ///
    /// The victim's page is written back if dirty and its directory entry
    /// removed before the frame is handed out.
    fn acquire_frame(&self, core: &mut PoolCore) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = core.free_list.pop_front() {
            return Ok(frame_id);
        }

        let victim = self.replacer.evict().ok_or(BufferPoolError::BufferPoolFull)?;
        let old_page_id = {
            let frame = &mut core.frames[victim as usize];
            debug_assert_eq!(frame.pin_count, 0, "evicted frame must be unpinned");
            let page = frame.page.read();
            if frame.is_dirty {
                self.disk_manager.write_page(&page)?;
            }
            page.page_id
        };
        core.frames[victim as usize].is_dirty = false;

        if old_page_id != INVALID_PAGE_ID {
            self.page_table.remove(&old_page_id);
        }
        Ok(victim)
    }

    fn flush_frame(&self, core: &mut PoolCore, frame_id: FrameId) -> Result<(), BufferPoolError> {
        let frame = &mut core.frames[frame_id as usize];
        {
            let page = frame.page.read();
            self.disk_manager.write_page(&page)?;
        }
        frame.is_dirty = false;
        Ok(())
    }
}
