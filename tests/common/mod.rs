use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use silodb::common::types::HEADER_PAGE_ID;
use silodb::storage::buffer::BufferPoolManager;

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool manager over a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(
    pool_size: usize,
    replacer_k: usize,
) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let _ = env_logger::builder().is_test(true).try_init();
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolManager::new(pool_size, replacer_k, path)?);
    Ok((buffer_pool, file))
}

// Create a buffer pool with the header page (page 0) already allocated,
// ready for index use
#[allow(dead_code)]
pub fn create_index_buffer_pool(
    pool_size: usize,
) -> Result<(Arc<BufferPoolManager>, NamedTempFile)> {
    let (buffer_pool, file) = create_test_buffer_pool(pool_size, 2)?;
    let (_, page_id) = buffer_pool.new_page()?;
    assert_eq!(page_id, HEADER_PAGE_ID, "first allocation is the header page");
    buffer_pool.unpin_page(page_id, true)?;
    Ok((buffer_pool, file))
}
