use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{Rid, TableOid, TxnId, INVALID_TXN_ID};
use crate::transaction::concurrency::transaction::{
    IsolationLevel, Transaction, TransactionState,
};

/// Hierarchical lock modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockMode {
    Shared,
    Exclusive,
    IntentionShared,
    IntentionExclusive,
    SharedIntentionExclusive,
}

impl LockMode {
    /// The compatibility matrix. Symmetric.
    pub fn is_compatible_with(self, other: LockMode) -> bool {
        use LockMode::*;
        match self {
            IntentionShared => other != Exclusive,
            IntentionExclusive => matches!(other, IntentionShared | IntentionExclusive),
            Shared => matches!(other, IntentionShared | Shared),
            SharedIntentionExclusive => other == IntentionShared,
            Exclusive => false,
        }
    }

    /// Whether a held lock may be upgraded to `target`
    fn can_upgrade_to(self, target: LockMode) -> bool {
        use LockMode::*;
        match self {
            IntentionShared => matches!(
                target,
                Shared | Exclusive | IntentionExclusive | SharedIntentionExclusive
            ),
            Shared | IntentionExclusive => {
                matches!(target, Exclusive | SharedIntentionExclusive)
            }
            SharedIntentionExclusive => target == Exclusive,
            Exclusive => false,
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LockMode::Shared => "S",
            LockMode::Exclusive => "X",
            LockMode::IntentionShared => "IS",
            LockMode::IntentionExclusive => "IX",
            LockMode::SharedIntentionExclusive => "SIX",
        };
        write!(f, "{}", s)
    }
}

/// Why the lock manager aborted a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    LockOnShrinking,
    LockSharedOnReadUncommitted,
    UpgradeConflict,
    IncompatibleUpgrade,
    AttemptedIntentionLockOnRow,
    TableLockNotPresent,
    TableUnlockedBeforeUnlockingRows,
    AttemptedUnlockButNoLockHeld,
    Deadlock,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AbortReason::LockOnShrinking => "lock requested in the shrinking phase",
            AbortReason::LockSharedOnReadUncommitted => {
                "shared lock requested under read-uncommitted"
            }
            AbortReason::UpgradeConflict => "another upgrade is already pending",
            AbortReason::IncompatibleUpgrade => "upgrade path not allowed",
            AbortReason::AttemptedIntentionLockOnRow => "intention lock requested on a row",
            AbortReason::TableLockNotPresent => "row lock without a suitable table lock",
            AbortReason::TableUnlockedBeforeUnlockingRows => {
                "table unlocked before its row locks"
            }
            AbortReason::AttemptedUnlockButNoLockHeld => "unlock without a held lock",
            AbortReason::Deadlock => "chosen as a deadlock victim",
        };
        write!(f, "{}", s)
    }
}

#[derive(Error, Debug)]
pub enum LockError {
    #[error("transaction {txn_id} aborted: {reason}")]
    TransactionAborted { txn_id: TxnId, reason: AbortReason },
}

/// One queued request: who wants which mode, and whether it has been granted
struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

struct QueueState {
    requests: Vec<LockRequest>,
    /// Transaction currently upgrading on this resource, or the sentinel
    upgrading: TxnId,
}

/// FIFO request queue for one resource, with the condition variable its
/// waiters sleep on
struct LockRequestQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

impl LockRequestQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                requests: Vec::new(),
                upgrading: INVALID_TXN_ID,
            }),
            cv: Condvar::new(),
        }
    }
}

/// Configuration knobs for the lock manager
#[derive(Debug, Clone)]
pub struct LockManagerConfig {
    /// Run the background waits-for cycle detector
    pub enable_cycle_detection: bool,
    /// How often the detector scans for cycles
    pub cycle_detection_interval: Duration,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            enable_cycle_detection: true,
            cycle_detection_interval: Duration::from_millis(50),
        }
    }
}

struct LockManagerInner {
    table_lock_map: Mutex<HashMap<TableOid, Arc<LockRequestQueue>>>,
    row_lock_map: Mutex<HashMap<Rid, Arc<LockRequestQueue>>>,
    /// Transactions seen by any lock call, so the detector can mark victims
    txns: Mutex<HashMap<TxnId, Weak<Transaction>>>,
    running: AtomicBool,
}

/// Strict two-phase-locking lock manager over tables and rows.
///
/// Requests queue FIFO per resource; a request is granted once every earlier
/// entry is mode-compatible with it. Upgrades re-enter the queue at the
/// granted/waiting boundary. A background thread builds the waits-for graph
/// at a fixed interval and aborts the largest transaction id on any cycle.
pub struct LockManager {
    inner: Arc<LockManagerInner>,
    detector: Option<JoinHandle<()>>,
}

impl LockManager {
    pub fn new(config: LockManagerConfig) -> Self {
        let inner = Arc::new(LockManagerInner {
            table_lock_map: Mutex::new(HashMap::new()),
            row_lock_map: Mutex::new(HashMap::new()),
            txns: Mutex::new(HashMap::new()),
            running: AtomicBool::new(config.enable_cycle_detection),
        });

        let detector = if config.enable_cycle_detection {
            let inner = Arc::clone(&inner);
            let interval = config.cycle_detection_interval;
            Some(std::thread::spawn(move || {
                while inner.running.load(Ordering::Acquire) {
                    std::thread::sleep(interval);
                    if !inner.running.load(Ordering::Acquire) {
                        break;
                    }
                    inner.run_cycle_detection();
                }
            }))
        } else {
            None
        };

        Self { inner, detector }
    }

    /// Acquire (or upgrade to) a table lock.
    ///
    /// Blocks until granted. `Ok(false)` means the deadlock detector aborted
    /// this transaction while it waited; taxonomy violations abort the
    /// transaction and return the error.
    pub fn lock_table(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
    ) -> Result<bool, LockError> {
        self.register_txn(txn);
        self.check_lockable(txn, mode)?;

        let held = txn.table_lock_mode(oid);
        if let Some(held_mode) = held {
            if held_mode == mode {
                return Ok(true);
            }
            if !held_mode.can_upgrade_to(mode) {
                return Err(self.abort_txn(txn, AbortReason::IncompatibleUpgrade));
            }
        }

        let queue = {
            let mut map = self.inner.table_lock_map.lock();
            Arc::clone(map.entry(oid).or_insert_with(|| Arc::new(LockRequestQueue::new())))
        };

        let granted = self.wait_for_grant(txn, &queue, mode, held, || {
            if let Some(held_mode) = held {
                txn.remove_table_lock(oid, held_mode);
            }
        })?;
        if granted {
            txn.add_table_lock(oid, mode);
        }
        Ok(granted)
    }

    /// Release a table lock. All row locks on the table must already be
    /// released.
    pub fn unlock_table(&self, txn: &Arc<Transaction>, oid: TableOid) -> Result<(), LockError> {
        let Some(held_mode) = txn.table_lock_mode(oid) else {
            return Err(self.abort_txn(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };
        if txn.holds_row_locks_on(oid) {
            return Err(self.abort_txn(txn, AbortReason::TableUnlockedBeforeUnlockingRows));
        }

        let queue = {
            let map = self.inner.table_lock_map.lock();
            map.get(&oid).cloned()
        }
        .expect("held table lock has a request queue");

        self.remove_granted_request(txn, &queue);
        txn.remove_table_lock(oid, held_mode);
        self.apply_shrinking_transition(txn, held_mode)?;
        queue.cv.notify_all();
        Ok(())
    }

    /// Acquire (or upgrade to) a row lock. Only S and X are valid, and a
    /// suitable table lock must already be held.
    pub fn lock_row(
        &self,
        txn: &Arc<Transaction>,
        mode: LockMode,
        oid: TableOid,
        rid: Rid,
    ) -> Result<bool, LockError> {
        self.register_txn(txn);
        self.check_lockable(txn, mode)?;

        if !matches!(mode, LockMode::Shared | LockMode::Exclusive) {
            return Err(self.abort_txn(txn, AbortReason::AttemptedIntentionLockOnRow));
        }

        let Some(table_mode) = txn.table_lock_mode(oid) else {
            return Err(self.abort_txn(txn, AbortReason::TableLockNotPresent));
        };
        if mode == LockMode::Exclusive
            && matches!(table_mode, LockMode::Shared | LockMode::IntentionShared)
        {
            return Err(self.abort_txn(txn, AbortReason::TableLockNotPresent));
        }

        let held = txn.row_lock_mode(oid, rid);
        if let Some(held_mode) = held {
            if held_mode == mode {
                return Ok(true);
            }
            if !held_mode.can_upgrade_to(mode) {
                return Err(self.abort_txn(txn, AbortReason::IncompatibleUpgrade));
            }
        }

        let queue = {
            let mut map = self.inner.row_lock_map.lock();
            Arc::clone(map.entry(rid).or_insert_with(|| Arc::new(LockRequestQueue::new())))
        };

        let granted = self.wait_for_grant(txn, &queue, mode, held, || {
            if let Some(held_mode) = held {
                txn.remove_row_lock(oid, rid, held_mode);
            }
        })?;
        if granted {
            txn.add_row_lock(oid, rid, mode);
        }
        Ok(granted)
    }

    /// Release a row lock
    pub fn unlock_row(
        &self,
        txn: &Arc<Transaction>,
        oid: TableOid,
        rid: Rid,
    ) -> Result<(), LockError> {
        let Some(held_mode) = txn.row_lock_mode(oid, rid) else {
            return Err(self.abort_txn(txn, AbortReason::AttemptedUnlockButNoLockHeld));
        };

        let queue = {
            let map = self.inner.row_lock_map.lock();
            map.get(&rid).cloned()
        }
        .expect("held row lock has a request queue");

        self.remove_granted_request(txn, &queue);
        txn.remove_row_lock(oid, rid, held_mode);
        self.apply_shrinking_transition(txn, held_mode)?;
        queue.cv.notify_all();
        Ok(())
    }

    /// Queue a request and block on the queue's condition variable until it
    /// can be granted or the transaction is aborted from outside.
    fn wait_for_grant(
        &self,
        txn: &Arc<Transaction>,
        queue: &Arc<LockRequestQueue>,
        mode: LockMode,
        upgrading_from: Option<LockMode>,
        remove_held_from_txn: impl FnOnce(),
    ) -> Result<bool, LockError> {
        let txn_id = txn.id();
        let mut state = queue.state.lock();

        if let Some(held_mode) = upgrading_from {
            if state.upgrading != INVALID_TXN_ID {
                return Err(self.abort_txn(txn, AbortReason::UpgradeConflict));
            }
            state.upgrading = txn_id;

            let pos = state
                .requests
                .iter()
                .position(|r| r.txn_id == txn_id)
                .expect("upgrading transaction holds a granted request");
            debug_assert!(state.requests[pos].granted);
            debug_assert_eq!(state.requests[pos].mode, held_mode);
            state.requests.remove(pos);
            remove_held_from_txn();

            // Upgrades jump the wait line: re-enter at the boundary between
            // granted and waiting entries.
            let boundary = state
                .requests
                .iter()
                .position(|r| !r.granted)
                .unwrap_or(state.requests.len());
            state.requests.insert(
                boundary,
                LockRequest {
                    txn_id,
                    mode,
                    granted: false,
                },
            );
        } else {
            state.requests.push(LockRequest {
                txn_id,
                mode,
                granted: false,
            });
        }

        loop {
            if Self::can_grant(&state.requests, txn_id) {
                break;
            }
            queue.cv.wait(&mut state);

            // The deadlock detector may have marked this transaction
            // aborted; clean up the queue entry and bow out.
            if txn.state() == TransactionState::Aborted {
                let pos = state
                    .requests
                    .iter()
                    .position(|r| r.txn_id == txn_id)
                    .expect("waiting transaction has a queue entry");
                state.requests.remove(pos);
                if state.upgrading == txn_id {
                    state.upgrading = INVALID_TXN_ID;
                }
                queue.cv.notify_all();
                return Ok(false);
            }
        }

        let request = state
            .requests
            .iter_mut()
            .find(|r| r.txn_id == txn_id)
            .expect("grantable transaction has a queue entry");
        request.granted = true;
        if state.upgrading == txn_id {
            state.upgrading = INVALID_TXN_ID;
        }
        Ok(true)
    }

    /// A request is grantable once every entry ahead of it is compatible
    fn can_grant(requests: &[LockRequest], txn_id: TxnId) -> bool {
        let pos = requests
            .iter()
            .position(|r| r.txn_id == txn_id)
            .expect("request present in its queue");
        let mode = requests[pos].mode;
        requests[..pos]
            .iter()
            .all(|earlier| earlier.mode.is_compatible_with(mode))
    }

    /// Isolation-level and 2PL-phase validation, applied before queueing
    fn check_lockable(&self, txn: &Arc<Transaction>, mode: LockMode) -> Result<(), LockError> {
        let state = txn.state();
        if state == TransactionState::Committed || state == TransactionState::Aborted {
            return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
        }

        match txn.isolation_level() {
            IsolationLevel::RepeatableRead => {
                if state == TransactionState::Shrinking {
                    return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadCommitted => {
                if state == TransactionState::Shrinking
                    && !matches!(mode, LockMode::IntentionShared | LockMode::Shared)
                {
                    return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
                }
            }
            IsolationLevel::ReadUncommitted => {
                if !matches!(mode, LockMode::IntentionExclusive | LockMode::Exclusive) {
                    return Err(self.abort_txn(txn, AbortReason::LockSharedOnReadUncommitted));
                }
                if state == TransactionState::Shrinking {
                    return Err(self.abort_txn(txn, AbortReason::LockOnShrinking));
                }
            }
        }
        Ok(())
    }

    /// Strict 2PL: releasing S or X during the growing phase may flip the
    /// transaction into shrinking, depending on the isolation level.
    fn apply_shrinking_transition(
        &self,
        txn: &Arc<Transaction>,
        released: LockMode,
    ) -> Result<(), LockError> {
        if !matches!(released, LockMode::Shared | LockMode::Exclusive) {
            return Ok(());
        }
        if txn.state() != TransactionState::Growing {
            return Ok(());
        }

        match txn.isolation_level() {
            IsolationLevel::RepeatableRead => txn.set_state(TransactionState::Shrinking),
            IsolationLevel::ReadCommitted => {
                if released == LockMode::Exclusive {
                    txn.set_state(TransactionState::Shrinking);
                }
            }
            IsolationLevel::ReadUncommitted => {
                if released == LockMode::Exclusive {
                    txn.set_state(TransactionState::Shrinking);
                } else {
                    // A granted S lock cannot exist at this level.
                    return Err(self.abort_txn(txn, AbortReason::LockSharedOnReadUncommitted));
                }
            }
        }
        Ok(())
    }

    fn remove_granted_request(&self, txn: &Arc<Transaction>, queue: &Arc<LockRequestQueue>) {
        let txn_id = txn.id();
        let mut state = queue.state.lock();
        let pos = state
            .requests
            .iter()
            .position(|r| r.txn_id == txn_id)
            .expect("unlock finds the granted request");
        debug_assert!(state.requests[pos].granted);
        state.requests.remove(pos);
    }

    fn abort_txn(&self, txn: &Arc<Transaction>, reason: AbortReason) -> LockError {
        txn.set_state(TransactionState::Aborted);
        txn.set_abort_reason(reason);
        LockError::TransactionAborted {
            txn_id: txn.id(),
            reason,
        }
    }

    fn register_txn(&self, txn: &Arc<Transaction>) {
        self.inner
            .txns
            .lock()
            .insert(txn.id(), Arc::downgrade(txn));
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        self.inner.running.store(false, Ordering::Release);
        if let Some(handle) = self.detector.take() {
            let _ = handle.join();
        }
    }
}

impl LockManagerInner {
    /// One detector pass: snapshot the queues into a waits-for graph, then
    /// abort the largest transaction id on each cycle and wake its waits.
    fn run_cycle_detection(&self) {
        let table_map = self.table_lock_map.lock();
        let row_map = self.row_lock_map.lock();

        let mut waits_for: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        let mut table_waits: HashMap<TxnId, Vec<TableOid>> = HashMap::new();
        let mut row_waits: HashMap<TxnId, Vec<Rid>> = HashMap::new();

        for (&oid, queue) in table_map.iter() {
            let state = queue.state.lock();
            Self::collect_edges(&state.requests, &mut waits_for, |txn_id| {
                table_waits.entry(txn_id).or_default().push(oid);
            });
        }
        for (&rid, queue) in row_map.iter() {
            let state = queue.state.lock();
            Self::collect_edges(&state.requests, &mut waits_for, |txn_id| {
                row_waits.entry(txn_id).or_default().push(rid);
            });
        }

        while let Some(victim) = Self::find_cycle_victim(&waits_for) {
            log::info!("deadlock detected, aborting transaction {}", victim);
            if let Some(txn) = self.txns.lock().get(&victim).and_then(Weak::upgrade) {
                txn.set_state(TransactionState::Aborted);
                txn.set_abort_reason(AbortReason::Deadlock);
            }
            waits_for.remove(&victim);

            // Only mark and signal; the waiter removes its own queue entry.
            if let Some(oids) = table_waits.remove(&victim) {
                for oid in oids {
                    if let Some(queue) = table_map.get(&oid) {
                        queue.cv.notify_all();
                    }
                }
            }
            if let Some(rids) = row_waits.remove(&victim) {
                for rid in rids {
                    if let Some(queue) = row_map.get(&rid) {
                        queue.cv.notify_all();
                    }
                }
            }
        }

        self.txns.lock().retain(|_, weak| weak.strong_count() > 0);
    }

    /// Add an edge from every waiting transaction to every granted holder
    fn collect_edges(
        requests: &[LockRequest],
        waits_for: &mut BTreeMap<TxnId, BTreeSet<TxnId>>,
        mut note_waiting: impl FnMut(TxnId),
    ) {
        let granted: Vec<TxnId> = requests
            .iter()
            .filter(|r| r.granted)
            .map(|r| r.txn_id)
            .collect();
        for request in requests.iter().filter(|r| !r.granted) {
            note_waiting(request.txn_id);
            for &holder in &granted {
                waits_for.entry(request.txn_id).or_default().insert(holder);
            }
        }
    }

    /// Tricolor DFS from each transaction in ascending id order; on a back
    /// edge, walk the parent chain around the cycle and pick the largest id.
    fn find_cycle_victim(waits_for: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<TxnId> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        fn dfs(
            graph: &BTreeMap<TxnId, BTreeSet<TxnId>>,
            node: TxnId,
            colors: &mut HashMap<TxnId, Color>,
            parents: &mut HashMap<TxnId, TxnId>,
        ) -> Option<TxnId> {
            colors.insert(node, Color::Gray);
            if let Some(next_nodes) = graph.get(&node) {
                for &next in next_nodes {
                    match colors.get(&next).copied().unwrap_or(Color::White) {
                        Color::Black => continue,
                        Color::Gray => {
                            let mut max_txn = node;
                            let mut current = node;
                            while current != next {
                                current = parents[&current];
                                max_txn = max_txn.max(current);
                            }
                            return Some(max_txn);
                        }
                        Color::White => {
                            parents.insert(next, node);
                            if let Some(victim) = dfs(graph, next, colors, parents) {
                                return Some(victim);
                            }
                        }
                    }
                }
            }
            colors.insert(node, Color::Black);
            None
        }

        for &start in waits_for.keys() {
            let mut colors = HashMap::new();
            let mut parents = HashMap::new();
            if let Some(victim) = dfs(waits_for, start, &mut colors, &mut parents) {
                return Some(victim);
            }
        }
        None
    }
}
