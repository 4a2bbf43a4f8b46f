use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use parking_lot::Mutex;
use thiserror::Error;

use crate::common::types::{Page, PageId, INVALID_PAGE_ID, PAGE_SIZE};

#[derive(Error, Debug)]
pub enum DiskManagerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Invalid page ID: {0}")]
    InvalidPageId(PageId),
}

/// DiskManager is responsible for the actual disk I/O operations.
///
/// Page ids are handed out monotonically starting at 0; id 0 is by
/// convention the header page of the database file.
pub struct DiskManager {
    db_file: Mutex<File>,
    next_page_id: AtomicU32,
}

impl DiskManager {
    /// Open (or create) the database file at the given path
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self, DiskManagerError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(db_path)?;

        let file_size = file.metadata()?.len();
        let next_page_id = (file_size / PAGE_SIZE as u64) as PageId;

        Ok(Self {
            db_file: Mutex::new(file),
            next_page_id: AtomicU32::new(next_page_id),
        })
    }

    /// Read a page from disk.
    ///
    /// Reading past the end of the file yields a zeroed page; the file is
    /// extended lazily by the first write.
    pub fn read_page(&self, page_id: PageId, page: &mut Page) -> Result<(), DiskManagerError> {
        if page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page_id));
        }

        let offset = self.page_offset(page_id);
        let mut file = self.db_file.lock();

        let file_size = file.metadata()?.len();
        if offset >= file_size {
            page.reset();
            page.page_id = page_id;
            return Ok(());
        }

        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut page.data)?;
        page.page_id = page_id;

        Ok(())
    }

    /// Write a page to disk
    pub fn write_page(&self, page: &Page) -> Result<(), DiskManagerError> {
        if page.page_id == INVALID_PAGE_ID {
            return Err(DiskManagerError::InvalidPageId(page.page_id));
        }

        let offset = self.page_offset(page.page_id);
        let mut file = self.db_file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&page.data)?;
        file.flush()?;

        Ok(())
    }

    /// Hand out the next page id
    pub fn allocate_page(&self) -> PageId {
        self.next_page_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Return a page to the allocator.
    ///
    /// The file is not shrunk; the slot is simply no longer referenced.
    pub fn deallocate_page(&self, page_id: PageId) {
        log::debug!("deallocate page {}", page_id);
    }

    fn page_offset(&self, page_id: PageId) -> u64 {
        page_id as u64 * PAGE_SIZE as u64
    }
}
