pub mod lock_manager;
pub mod transaction;

pub use lock_manager::{AbortReason, LockError, LockManager, LockManagerConfig, LockMode};
pub use transaction::{IsolationLevel, Transaction, TransactionState};
