pub mod concurrency;

pub use concurrency::{
    AbortReason, IsolationLevel, LockError, LockManager, LockManagerConfig, LockMode,
    Transaction, TransactionState,
};
