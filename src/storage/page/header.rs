use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};

// Layout of page 0: a u32 record count followed by fixed-width records of
// (32-byte NUL-padded name, u32 root page id).
const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;
const MAX_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

/// Accessors for the header page: the on-disk directory of
/// (index name -> root page id) records.
pub struct HeaderPage;

impl HeaderPage {
    pub fn record_count(page: &Page) -> usize {
        LittleEndian::read_u32(&page.data[RECORD_COUNT_OFFSET..RECORDS_OFFSET]) as usize
    }

    fn set_record_count(page: &mut Page, count: usize) {
        LittleEndian::write_u32(
            &mut page.data[RECORD_COUNT_OFFSET..RECORDS_OFFSET],
            count as u32,
        );
    }

    fn record_offset(index: usize) -> usize {
        RECORDS_OFFSET + index * RECORD_SIZE
    }

    fn name_at(page: &Page, index: usize) -> &[u8] {
        let offset = Self::record_offset(index);
        let name = &page.data[offset..offset + NAME_SIZE];
        let len = name.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
        &name[..len]
    }

    fn find_index(page: &Page, name: &str) -> Option<usize> {
        (0..Self::record_count(page)).find(|&i| Self::name_at(page, i) == name.as_bytes())
    }

    /// Append a (name -> root id) record. Fails on duplicates, overlong
    /// names, and a full page.
    pub fn insert_record(page: &mut Page, name: &str, root_id: PageId) -> bool {
        let count = Self::record_count(page);
        if name.len() > NAME_SIZE || count >= MAX_RECORDS {
            return false;
        }
        if Self::find_index(page, name).is_some() {
            return false;
        }

        let offset = Self::record_offset(count);
        page.data[offset..offset + NAME_SIZE].fill(0);
        page.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        LittleEndian::write_u32(
            &mut page.data[offset + NAME_SIZE..offset + RECORD_SIZE],
            root_id,
        );
        Self::set_record_count(page, count + 1);
        true
    }

    /// Rewrite the root id of an existing record
    pub fn update_record(page: &mut Page, name: &str, root_id: PageId) -> bool {
        let Some(index) = Self::find_index(page, name) else {
            return false;
        };
        let offset = Self::record_offset(index);
        LittleEndian::write_u32(
            &mut page.data[offset + NAME_SIZE..offset + RECORD_SIZE],
            root_id,
        );
        true
    }

    /// Remove a record, compacting the tail over it
    pub fn delete_record(page: &mut Page, name: &str) -> bool {
        let Some(index) = Self::find_index(page, name) else {
            return false;
        };
        let count = Self::record_count(page);
        let from = Self::record_offset(index + 1);
        let to = Self::record_offset(index);
        let end = Self::record_offset(count);
        page.data.copy_within(from..end, to);
        Self::set_record_count(page, count - 1);
        true
    }

    /// Look up the root page id recorded under `name`
    pub fn find_record(page: &Page, name: &str) -> Option<PageId> {
        let index = Self::find_index(page, name)?;
        let offset = Self::record_offset(index);
        Some(LittleEndian::read_u32(
            &page.data[offset + NAME_SIZE..offset + RECORD_SIZE],
        ))
    }
}
