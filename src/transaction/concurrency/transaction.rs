use std::collections::{HashMap, HashSet};
use parking_lot::{Mutex, RwLock};

use crate::common::types::{Rid, TableOid, TxnId};
use crate::transaction::concurrency::lock_manager::{AbortReason, LockMode};

/// Transaction isolation levels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
}

/// Two-phase locking states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

/// Locks currently held by a transaction, one set per table-lock mode plus
/// per-table row sets. Only the lock manager writes these.
#[derive(Default)]
struct LockSets {
    shared_table: HashSet<TableOid>,
    exclusive_table: HashSet<TableOid>,
    intention_shared_table: HashSet<TableOid>,
    intention_exclusive_table: HashSet<TableOid>,
    shared_intention_exclusive_table: HashSet<TableOid>,
    shared_rows: HashMap<TableOid, HashSet<Rid>>,
    exclusive_rows: HashMap<TableOid, HashSet<Rid>>,
}

impl LockSets {
    fn table_set(&mut self, mode: LockMode) -> &mut HashSet<TableOid> {
        match mode {
            LockMode::Shared => &mut self.shared_table,
            LockMode::Exclusive => &mut self.exclusive_table,
            LockMode::IntentionShared => &mut self.intention_shared_table,
            LockMode::IntentionExclusive => &mut self.intention_exclusive_table,
            LockMode::SharedIntentionExclusive => &mut self.shared_intention_exclusive_table,
        }
    }
}

/// An active transaction as the engine sees it: an id, an isolation level,
/// a 2PL state, and the lock sets the lock manager maintains on its behalf.
/// Lifecycle (commit, abort, logging) belongs to the caller.
pub struct Transaction {
    id: TxnId,
    isolation_level: IsolationLevel,
    state: RwLock<TransactionState>,
    abort_reason: Mutex<Option<AbortReason>>,
    lock_sets: Mutex<LockSets>,
}

impl Transaction {
    pub fn new(id: TxnId, isolation_level: IsolationLevel) -> Self {
        Self {
            id,
            isolation_level,
            state: RwLock::new(TransactionState::Growing),
            abort_reason: Mutex::new(None),
            lock_sets: Mutex::new(LockSets::default()),
        }
    }

    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    pub fn state(&self) -> TransactionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: TransactionState) {
        *self.state.write() = state;
    }

    /// Why the lock manager aborted this transaction, if it did
    pub fn abort_reason(&self) -> Option<AbortReason> {
        *self.abort_reason.lock()
    }

    pub(crate) fn set_abort_reason(&self, reason: AbortReason) {
        *self.abort_reason.lock() = Some(reason);
    }

    /// Mode of the table lock held on `oid`, if any
    pub fn table_lock_mode(&self, oid: TableOid) -> Option<LockMode> {
        let sets = self.lock_sets.lock();
        if sets.exclusive_table.contains(&oid) {
            Some(LockMode::Exclusive)
        } else if sets.intention_exclusive_table.contains(&oid) {
            Some(LockMode::IntentionExclusive)
        } else if sets.shared_intention_exclusive_table.contains(&oid) {
            Some(LockMode::SharedIntentionExclusive)
        } else if sets.intention_shared_table.contains(&oid) {
            Some(LockMode::IntentionShared)
        } else if sets.shared_table.contains(&oid) {
            Some(LockMode::Shared)
        } else {
            None
        }
    }

    /// Mode of the row lock held on (`oid`, `rid`), if any
    pub fn row_lock_mode(&self, oid: TableOid, rid: Rid) -> Option<LockMode> {
        let sets = self.lock_sets.lock();
        if sets
            .exclusive_rows
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
        {
            Some(LockMode::Exclusive)
        } else if sets
            .shared_rows
            .get(&oid)
            .is_some_and(|rows| rows.contains(&rid))
        {
            Some(LockMode::Shared)
        } else {
            None
        }
    }

    /// Whether any row of `oid` is still locked by this transaction
    pub fn holds_row_locks_on(&self, oid: TableOid) -> bool {
        let sets = self.lock_sets.lock();
        sets.shared_rows.get(&oid).is_some_and(|rows| !rows.is_empty())
            || sets
                .exclusive_rows
                .get(&oid)
                .is_some_and(|rows| !rows.is_empty())
    }

    pub(crate) fn add_table_lock(&self, oid: TableOid, mode: LockMode) {
        self.lock_sets.lock().table_set(mode).insert(oid);
    }

    pub(crate) fn remove_table_lock(&self, oid: TableOid, mode: LockMode) {
        let removed = self.lock_sets.lock().table_set(mode).remove(&oid);
        debug_assert!(removed, "released table lock was not in the lock set");
    }

    pub(crate) fn add_row_lock(&self, oid: TableOid, rid: Rid, mode: LockMode) {
        let mut sets = self.lock_sets.lock();
        let rows = match mode {
            LockMode::Shared => sets.shared_rows.entry(oid).or_default(),
            LockMode::Exclusive => sets.exclusive_rows.entry(oid).or_default(),
            _ => unreachable!("row locks are S or X"),
        };
        rows.insert(rid);
    }

    pub(crate) fn remove_row_lock(&self, oid: TableOid, rid: Rid, mode: LockMode) {
        let mut sets = self.lock_sets.lock();
        let removed = match mode {
            LockMode::Shared => sets
                .shared_rows
                .get_mut(&oid)
                .is_some_and(|rows| rows.remove(&rid)),
            LockMode::Exclusive => sets
                .exclusive_rows
                .get_mut(&oid)
                .is_some_and(|rows| rows.remove(&rid)),
            _ => unreachable!("row locks are S or X"),
        };
        debug_assert!(removed, "released row lock was not in the lock set");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_transaction_is_growing() {
        let txn = Transaction::new(1, IsolationLevel::RepeatableRead);
        assert_eq!(txn.id(), 1);
        assert_eq!(txn.state(), TransactionState::Growing);
        assert_eq!(txn.isolation_level(), IsolationLevel::RepeatableRead);
        assert_eq!(txn.abort_reason(), None);
    }

    #[test]
    fn test_table_lock_set_bookkeeping() {
        let txn = Transaction::new(2, IsolationLevel::ReadCommitted);
        assert_eq!(txn.table_lock_mode(7), None);

        txn.add_table_lock(7, LockMode::IntentionShared);
        assert_eq!(txn.table_lock_mode(7), Some(LockMode::IntentionShared));

        txn.remove_table_lock(7, LockMode::IntentionShared);
        txn.add_table_lock(7, LockMode::Exclusive);
        assert_eq!(txn.table_lock_mode(7), Some(LockMode::Exclusive));
    }

    #[test]
    fn test_row_lock_set_bookkeeping() {
        let txn = Transaction::new(3, IsolationLevel::RepeatableRead);
        let rid = Rid::new(4, 2);
        assert_eq!(txn.row_lock_mode(1, rid), None);
        assert!(!txn.holds_row_locks_on(1));

        txn.add_row_lock(1, rid, LockMode::Shared);
        assert_eq!(txn.row_lock_mode(1, rid), Some(LockMode::Shared));
        assert!(txn.holds_row_locks_on(1));

        txn.remove_row_lock(1, rid, LockMode::Shared);
        assert!(!txn.holds_row_locks_on(1));
    }
}
