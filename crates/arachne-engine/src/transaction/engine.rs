//! The coordinator transaction engine.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arachne_common::mvcc::TxStatus;
use arachne_common::types::{CommandId, Snapshot, TxId};
use arachne_common::utils::error::{Error, Result};
use arachne_common::utils::hash::{FxHashMap, FxHashSet};
use parking_lot::Mutex;

/// A live transaction handle.
///
/// Shared between the caller, the engine, and any cursors executing on
/// the transaction's behalf. The command counter and the abort flag are
/// atomics so cursors can observe them without locking.
#[derive(Debug)]
pub struct Transaction {
    id: TxId,
    snapshot: Snapshot,
    command: AtomicU64,
    should_abort: AtomicBool,
    deadline: Option<Instant>,
}

impl Transaction {
    fn new(id: TxId, snapshot: Snapshot, deadline: Option<Instant>) -> Self {
        Self {
            id,
            snapshot,
            command: AtomicU64::new(CommandId::FIRST.0),
            should_abort: AtomicBool::new(false),
            deadline,
        }
    }

    /// The transaction's identifier.
    #[must_use]
    pub fn id(&self) -> TxId {
        self.id
    }

    /// The set of transactions active when this one began.
    #[must_use]
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// The current command counter.
    #[must_use]
    pub fn command(&self) -> CommandId {
        CommandId(self.command.load(Ordering::Acquire))
    }

    fn advance_command(&self) -> CommandId {
        CommandId(self.command.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Tells cursors running on this transaction to stop at their next
    /// pull boundary.
    pub fn set_should_abort(&self) {
        self.should_abort.store(true, Ordering::Release);
    }

    /// Returns `true` when the abort flag is set or the deadline has
    /// passed. Cursors check this at every pull.
    #[must_use]
    pub fn should_abort(&self) -> bool {
        if self.should_abort.load(Ordering::Acquire) {
            return true;
        }
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }
}

/// Terminal fates of transactions, floor-compacted.
///
/// Ids below the floor are resolved: committed unless remembered in the
/// aborted set. Aborted ids are kept forever - they are rare, and
/// forgetting one would resurrect its versions.
#[derive(Debug, Default)]
struct CommitLog {
    floor: TxId,
    committed: FxHashSet<TxId>,
    aborted: FxHashSet<TxId>,
}

impl CommitLog {
    fn is_committed(&self, id: TxId) -> bool {
        if id == TxId::PRE_HISTORY {
            return true;
        }
        if id < self.floor {
            return !self.aborted.contains(&id);
        }
        self.committed.contains(&id)
    }

    fn is_aborted(&self, id: TxId) -> bool {
        self.aborted.contains(&id)
    }

    fn prune_below(&mut self, horizon: TxId) {
        if horizon <= self.floor {
            return;
        }
        self.committed.retain(|id| *id >= horizon);
        self.floor = horizon;
    }
}

#[derive(Debug, Default)]
struct EngineState {
    next_id: u64,
    active: BTreeSet<TxId>,
    live: FxHashMap<TxId, Arc<Transaction>>,
    clog: CommitLog,
}

/// Allocates transaction identifiers, tracks the active set, and serves
/// snapshot views.
///
/// Internally synchronized; begin, commit, abort and active-set reads are
/// linearizable under the state mutex.
#[derive(Debug)]
pub struct Engine {
    state: Mutex<EngineState>,
    /// Bumped on every terminal transition; periodic maintenance uses it
    /// to skip cycles where nothing ended.
    generation: AtomicU64,
}

impl Engine {
    /// Creates an engine whose first transaction gets id 1.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(EngineState {
                next_id: 1,
                ..EngineState::default()
            }),
            generation: AtomicU64::new(0),
        }
    }

    /// Begins a transaction with no deadline.
    pub fn begin(&self) -> Arc<Transaction> {
        self.begin_with_deadline(None)
    }

    /// Begins a transaction that should abort after `timeout`.
    pub fn begin_with_deadline(&self, timeout: Option<Duration>) -> Arc<Transaction> {
        let mut state = self.state.lock();
        let id = TxId(state.next_id);
        state.next_id += 1;
        let snapshot = Snapshot::from_ids(state.active.iter().copied().collect());
        let deadline = timeout.map(|t| Instant::now() + t);
        let tx = Arc::new(Transaction::new(id, snapshot, deadline));
        state.active.insert(id);
        state.live.insert(id, tx.clone());
        tx
    }

    /// Installs an externally-started transaction (worker side). Returns
    /// the existing handle when the id is already known - duplicates are
    /// idempotent.
    pub(crate) fn adopt(&self, id: TxId, snapshot: Snapshot) -> Arc<Transaction> {
        let mut state = self.state.lock();
        if let Some(existing) = state.live.get(&id) {
            return existing.clone();
        }
        state.next_id = state.next_id.max(id.0 + 1);
        let tx = Arc::new(Transaction::new(id, snapshot, None));
        state.active.insert(id);
        state.live.insert(id, tx.clone());
        tx
    }

    /// Marks a transaction committed.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::TransactionFinalized`] when the transaction is
    /// no longer active.
    pub fn commit(&self, tx: &Transaction) -> Result<()> {
        self.finalize(tx.id(), true)
    }

    /// Marks a transaction aborted.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::TransactionFinalized`] when the transaction is
    /// no longer active.
    pub fn abort(&self, tx: &Transaction) -> Result<()> {
        self.finalize(tx.id(), false)
    }

    fn finalize(&self, id: TxId, commit: bool) -> Result<()> {
        let mut state = self.state.lock();
        if !state.active.remove(&id) {
            return Err(Error::TransactionFinalized(id));
        }
        state.live.remove(&id);
        if commit {
            state.clog.committed.insert(id);
        } else {
            state.clog.aborted.insert(id);
        }
        // Everything below the new oldest-active is resolved; compact.
        let horizon = state
            .active
            .iter()
            .next()
            .copied()
            .unwrap_or(TxId(state.next_id));
        state.clog.prune_below(horizon);
        self.generation.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Advances the transaction's command counter.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::TransactionFinalized`] when the transaction is
    /// no longer active.
    pub fn advance(&self, tx: &Transaction) -> Result<CommandId> {
        let state = self.state.lock();
        if !state.active.contains(&tx.id()) {
            return Err(Error::TransactionFinalized(tx.id()));
        }
        Ok(tx.advance_command())
    }

    /// Point-in-time copy of the active set.
    #[must_use]
    pub fn active_snapshot(&self) -> Snapshot {
        let state = self.state.lock();
        Snapshot::from_ids(state.active.iter().copied().collect())
    }

    /// The minimum active identifier, or `None` when nothing is active.
    #[must_use]
    pub fn oldest_active(&self) -> Option<TxId> {
        self.state.lock().active.iter().next().copied()
    }

    /// The horizon below which no version can be needed by any live
    /// transaction: the minimum over active transactions of their own id
    /// and everything in their begin snapshot, or the next id to be
    /// assigned when idle.
    ///
    /// An expiration stamped by a committed transaction below this is
    /// visible to every live and future transaction, so the expired
    /// version is unreachable.
    #[must_use]
    pub fn gc_horizon(&self) -> TxId {
        let state = self.state.lock();
        state
            .live
            .values()
            .map(|tx| tx.snapshot().first().unwrap_or_else(|| tx.id()))
            .min()
            .unwrap_or(TxId(state.next_id))
    }

    /// Looks up the live handle for an id.
    #[must_use]
    pub fn transaction(&self, id: TxId) -> Option<Arc<Transaction>> {
        self.state.lock().live.get(&id).cloned()
    }

    /// Monotonic count of terminal transitions, for maintenance cadence.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Forces the next identifier strictly above `id` (recovery).
    pub fn ensure_next_above(&self, id: TxId) {
        let mut state = self.state.lock();
        state.next_id = state.next_id.max(id.0 + 1);
    }

    /// Drops live mirrors below the horizon and resolves the commit log
    /// up to it (worker-side cache cleanup).
    pub(crate) fn clear_below(&self, horizon: TxId) {
        let mut state = self.state.lock();
        let stale: Vec<TxId> = state
            .active
            .range(..horizon)
            .copied()
            .collect();
        for id in stale {
            state.active.remove(&id);
            state.live.remove(&id);
        }
        state.clog.prune_below(horizon);
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl TxStatus for Engine {
    fn is_committed(&self, id: TxId) -> bool {
        self.state.lock().clog.is_committed(id)
    }

    fn is_aborted(&self, id: TxId) -> bool {
        self.state.lock().clog.is_aborted(id)
    }
}
