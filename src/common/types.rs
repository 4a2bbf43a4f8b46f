use std::sync::Arc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = u32;

/// Sentinel for "no page"
pub const INVALID_PAGE_ID: PageId = u32::MAX;

/// The header page holding (index name -> root page id) records
pub const HEADER_PAGE_ID: PageId = 0;

/// Transaction ID type
pub type TxnId = u32;

/// Sentinel for "no transaction"
pub const INVALID_TXN_ID: TxnId = u32::MAX;

/// Table OID type
pub type TableOid = u32;

/// Buffer pool frame ID type
pub type FrameId = u32;

/// Record ID: the physical address of a tuple
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Rid {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot_num)
    }
}

/// Page structure
///
/// The surrounding `RwLock` doubles as the page latch taken during
/// B+ tree latch crabbing.
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
        }
    }

    /// Zero the payload, keeping the page id
    pub fn reset(&mut self) {
        self.data.fill(0);
    }
}

/// Smart pointer to a page
pub type PagePtr = Arc<RwLock<Page>>;
