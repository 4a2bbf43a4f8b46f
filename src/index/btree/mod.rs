pub mod error;
mod latch;
pub mod node;
pub mod serialization;

pub mod index;

pub use error::BTreeError;
pub use index::{BPlusTree, BTreeIterator};
pub use node::BTreeNode;
pub use serialization::{decode_node, encode_node};
