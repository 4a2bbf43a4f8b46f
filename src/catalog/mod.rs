pub mod schema;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use parking_lot::RwLock;
use thiserror::Error;

use crate::common::types::{PageId, Rid, TableOid};
use crate::index::btree::{BPlusTree, BTreeError};
use crate::index::key::GenericKey;
use crate::storage::buffer::BufferPoolManager;

pub use schema::{Column, DataType, Schema};

/// Index OID type
pub type IndexOid = u32;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Table {0} not found")]
    TableNotFound(String),

    #[error("Table {0} already exists")]
    DuplicateTable(String),

    #[error("Index {0} already exists on table {1}")]
    DuplicateIndex(String, String),

    #[error("Key width {0} exceeds the widest supported key")]
    KeyTooWide(usize),

    #[error("B+ tree error: {0}")]
    BTreeError(#[from] BTreeError),

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] crate::storage::buffer::BufferPoolError),
}

/// A concrete index behind a fixed-width key, erased behind a tagged
/// variant instead of runtime polymorphism
pub enum AnyIndex {
    Key4(BPlusTree<GenericKey<4>>),
    Key8(BPlusTree<GenericKey<8>>),
    Key16(BPlusTree<GenericKey<16>>),
    Key32(BPlusTree<GenericKey<32>>),
    Key64(BPlusTree<GenericKey<64>>),
}

impl AnyIndex {
    /// Byte width of this index's keys
    pub fn key_width(&self) -> usize {
        match self {
            AnyIndex::Key4(_) => 4,
            AnyIndex::Key8(_) => 8,
            AnyIndex::Key16(_) => 16,
            AnyIndex::Key32(_) => 32,
            AnyIndex::Key64(_) => 64,
        }
    }

    /// Insert a key given as raw bytes (zero-padded to the key width)
    pub fn insert(&self, key: &[u8], rid: Rid) -> Result<(), BTreeError> {
        match self {
            AnyIndex::Key4(tree) => tree.insert(GenericKey::from_slice(key), rid),
            AnyIndex::Key8(tree) => tree.insert(GenericKey::from_slice(key), rid),
            AnyIndex::Key16(tree) => tree.insert(GenericKey::from_slice(key), rid),
            AnyIndex::Key32(tree) => tree.insert(GenericKey::from_slice(key), rid),
            AnyIndex::Key64(tree) => tree.insert(GenericKey::from_slice(key), rid),
        }
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Rid>, BTreeError> {
        match self {
            AnyIndex::Key4(tree) => tree.get(&GenericKey::from_slice(key)),
            AnyIndex::Key8(tree) => tree.get(&GenericKey::from_slice(key)),
            AnyIndex::Key16(tree) => tree.get(&GenericKey::from_slice(key)),
            AnyIndex::Key32(tree) => tree.get(&GenericKey::from_slice(key)),
            AnyIndex::Key64(tree) => tree.get(&GenericKey::from_slice(key)),
        }
    }

    pub fn remove(&self, key: &[u8]) -> Result<(), BTreeError> {
        match self {
            AnyIndex::Key4(tree) => tree.remove(&GenericKey::from_slice(key)),
            AnyIndex::Key8(tree) => tree.remove(&GenericKey::from_slice(key)),
            AnyIndex::Key16(tree) => tree.remove(&GenericKey::from_slice(key)),
            AnyIndex::Key32(tree) => tree.remove(&GenericKey::from_slice(key)),
            AnyIndex::Key64(tree) => tree.remove(&GenericKey::from_slice(key)),
        }
    }
}

/// Metadata for one table: schema, heap location, oid
pub struct TableInfo {
    name: String,
    oid: TableOid,
    schema: Schema,
    first_page_id: RwLock<Option<PageId>>,
}

impl TableInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn oid(&self) -> TableOid {
        self.oid
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// First page of the table heap, once one exists
    pub fn first_page_id(&self) -> Option<PageId> {
        *self.first_page_id.read()
    }

    pub fn set_first_page_id(&self, page_id: PageId) {
        *self.first_page_id.write() = Some(page_id);
    }
}

/// Metadata for one index: key layout plus the erased index itself
pub struct IndexInfo {
    name: String,
    oid: IndexOid,
    table_name: String,
    key_schema: Schema,
    key_attrs: Vec<usize>,
    index: AnyIndex,
}

impl IndexInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn oid(&self) -> IndexOid {
        self.oid
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    pub fn key_schema(&self) -> &Schema {
        &self.key_schema
    }

    pub fn key_attrs(&self) -> &[usize] {
        &self.key_attrs
    }

    pub fn index(&self) -> &AnyIndex {
        &self.index
    }
}

/// Table and index metadata registry.
///
/// Indexes are created over the buffer pool; picking the key width happens
/// here, from the key schema, so callers only ever see `AnyIndex`.
pub struct Catalog {
    buffer_pool: Arc<BufferPoolManager>,
    tables: RwLock<HashMap<TableOid, Arc<TableInfo>>>,
    table_names: RwLock<HashMap<String, TableOid>>,
    indexes: RwLock<HashMap<IndexOid, Arc<IndexInfo>>>,
    index_names: RwLock<HashMap<String, HashMap<String, IndexOid>>>,
    next_table_oid: AtomicU32,
    next_index_oid: AtomicU32,
}

impl Catalog {
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            tables: RwLock::new(HashMap::new()),
            table_names: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
            index_names: RwLock::new(HashMap::new()),
            next_table_oid: AtomicU32::new(0),
            next_index_oid: AtomicU32::new(0),
        }
    }

    pub fn create_table(
        &self,
        name: impl Into<String>,
        schema: Schema,
    ) -> Result<Arc<TableInfo>, CatalogError> {
        let name = name.into();
        let mut table_names = self.table_names.write();
        if table_names.contains_key(&name) {
            return Err(CatalogError::DuplicateTable(name));
        }

        let oid = self.next_table_oid.fetch_add(1, Ordering::SeqCst);
        let info = Arc::new(TableInfo {
            name: name.clone(),
            oid,
            schema,
            first_page_id: RwLock::new(None),
        });
        table_names.insert(name.clone(), oid);
        self.tables.write().insert(oid, Arc::clone(&info));
        self.index_names.write().entry(name).or_default();
        Ok(info)
    }

    pub fn get_table(&self, oid: TableOid) -> Option<Arc<TableInfo>> {
        self.tables.read().get(&oid).cloned()
    }

    pub fn get_table_by_name(&self, name: &str) -> Option<Arc<TableInfo>> {
        let oid = *self.table_names.read().get(name)?;
        self.get_table(oid)
    }

    /// Create a B+ tree index over `key_attrs` of `table_name`. The key
    /// width is the smallest supported width that fits the key schema.
    pub fn create_index(
        &self,
        index_name: impl Into<String>,
        table_name: &str,
        key_attrs: Vec<usize>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Arc<IndexInfo>, CatalogError> {
        let index_name = index_name.into();
        let table = self
            .get_table_by_name(table_name)
            .ok_or_else(|| CatalogError::TableNotFound(table_name.to_string()))?;
        let key_schema = table.schema().project(&key_attrs);

        {
            let index_names = self.index_names.read();
            if index_names
                .get(table_name)
                .is_some_and(|m| m.contains_key(&index_name))
            {
                return Err(CatalogError::DuplicateIndex(
                    index_name,
                    table_name.to_string(),
                ));
            }
        }

        let pool = Arc::clone(&self.buffer_pool);
        let width = key_schema.key_width();
        let index = match width {
            0..=4 => AnyIndex::Key4(BPlusTree::new(
                index_name.clone(),
                pool,
                leaf_max_size,
                internal_max_size,
            )?),
            5..=8 => AnyIndex::Key8(BPlusTree::new(
                index_name.clone(),
                pool,
                leaf_max_size,
                internal_max_size,
            )?),
            9..=16 => AnyIndex::Key16(BPlusTree::new(
                index_name.clone(),
                pool,
                leaf_max_size,
                internal_max_size,
            )?),
            17..=32 => AnyIndex::Key32(BPlusTree::new(
                index_name.clone(),
                pool,
                leaf_max_size,
                internal_max_size,
            )?),
            33..=64 => AnyIndex::Key64(BPlusTree::new(
                index_name.clone(),
                pool,
                leaf_max_size,
                internal_max_size,
            )?),
            _ => return Err(CatalogError::KeyTooWide(width)),
        };

        let oid = self.next_index_oid.fetch_add(1, Ordering::SeqCst);
        let info = Arc::new(IndexInfo {
            name: index_name.clone(),
            oid,
            table_name: table_name.to_string(),
            key_schema,
            key_attrs,
            index,
        });
        self.indexes.write().insert(oid, Arc::clone(&info));
        self.index_names
            .write()
            .entry(table_name.to_string())
            .or_default()
            .insert(index_name, oid);
        Ok(info)
    }

    /// Forget an index: drop its metadata and erase its header-page record.
    /// Pages of the dropped tree are left to the allocator.
    pub fn drop_index(&self, table_name: &str, index_name: &str) -> Result<(), CatalogError> {
        let oid = {
            let mut index_names = self.index_names.write();
            let names = index_names
                .get_mut(table_name)
                .ok_or_else(|| CatalogError::TableNotFound(table_name.to_string()))?;
            names.remove(index_name)
        };
        let Some(oid) = oid else {
            return Ok(());
        };
        self.indexes.write().remove(&oid);

        let header = self.buffer_pool.fetch_page(crate::common::types::HEADER_PAGE_ID)?;
        {
            let mut page = header.write();
            crate::storage::page::HeaderPage::delete_record(&mut page, index_name);
        }
        self.buffer_pool
            .unpin_page(crate::common::types::HEADER_PAGE_ID, true)?;
        Ok(())
    }

    pub fn get_index(&self, table_name: &str, index_name: &str) -> Option<Arc<IndexInfo>> {
        let oid = *self.index_names.read().get(table_name)?.get(index_name)?;
        self.indexes.read().get(&oid).cloned()
    }

    /// Every index registered on `table_name`
    pub fn get_table_indexes(&self, table_name: &str) -> Vec<Arc<IndexInfo>> {
        let index_names = self.index_names.read();
        let Some(names) = index_names.get(table_name) else {
            return Vec::new();
        };
        let indexes = self.indexes.read();
        names
            .values()
            .filter_map(|oid| indexes.get(oid).cloned())
            .collect()
    }
}
