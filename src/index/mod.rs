pub mod btree;
pub mod key;

pub use btree::{BPlusTree, BTreeError, BTreeIterator};
pub use key::GenericKey;
