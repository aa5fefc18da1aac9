//! The worker-side transaction engine.

use std::sync::Arc;

use arachne_common::mvcc::TxStatus;
use arachne_common::types::{Snapshot, TxId};
use arachne_common::utils::error::{Error, Result};

use super::engine::{Engine, Transaction};

/// A worker's engine: a local [`Engine`] plus mirrors of transactions the
/// coordinator started.
///
/// Workers execute plan fragments inside transactions they did not begin.
/// The first remote pull for such a transaction registers it here with
/// the snapshot shipped in the request; later pulls find the mirror
/// already present.
#[derive(Debug, Default)]
pub struct WorkerEngine {
    local: Engine,
}

impl WorkerEngine {
    /// Creates a worker engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            local: Engine::new(),
        }
    }

    /// The local engine, for transactions this worker begins itself.
    #[must_use]
    pub fn local(&self) -> &Engine {
        &self.local
    }

    /// Registers (or retrieves) the mirror of a coordinator-started
    /// transaction. Idempotent: a duplicate registration returns the
    /// existing handle and ignores the snapshot argument.
    pub fn running_transaction(&self, id: TxId, snapshot: Snapshot) -> Arc<Transaction> {
        self.local.adopt(id, snapshot)
    }

    /// Advances the command mirror of a coordinator-started transaction.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnknownTransaction`] when the transaction was
    /// never registered (or already cleaned up).
    pub fn update_command(&self, id: TxId) -> Result<()> {
        let tx = self
            .local
            .transaction(id)
            .ok_or(Error::UnknownTransaction(id))?;
        self.local.advance(&tx)?;
        Ok(())
    }

    /// Drops transaction mirrors below the coordinator-published
    /// oldest-active horizon. Transactions the coordinator retired are
    /// resolved as committed in the local commit log; locally-aborted ones
    /// stay aborted.
    pub fn clear_transactional_cache(&self, oldest_active: TxId) {
        self.local.clear_below(oldest_active);
    }
}

impl TxStatus for WorkerEngine {
    fn is_committed(&self, id: TxId) -> bool {
        self.local.is_committed(id)
    }

    fn is_aborted(&self, id: TxId) -> bool {
        self.local.is_aborted(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arachne_common::types::CommandId;

    #[test]
    fn running_transaction_is_idempotent() {
        let engine = WorkerEngine::new();
        let snap = Snapshot::from_ids(vec![TxId(3)]);
        let a = engine.running_transaction(TxId(7), snap.clone());
        let b = engine.running_transaction(TxId(7), Snapshot::empty());
        assert!(Arc::ptr_eq(&a, &b));
        assert!(a.snapshot().contains(TxId(3)));
    }

    #[test]
    fn adopted_ids_push_local_allocation_up() {
        let engine = WorkerEngine::new();
        engine.running_transaction(TxId(100), Snapshot::empty());
        let local = engine.local().begin();
        assert!(local.id() > TxId(100));
    }

    #[test]
    fn update_command_advances_mirror() {
        let engine = WorkerEngine::new();
        let tx = engine.running_transaction(TxId(5), Snapshot::empty());
        assert_eq!(tx.command(), CommandId(1));
        engine.update_command(TxId(5)).unwrap();
        assert_eq!(tx.command(), CommandId(2));
        assert!(matches!(
            engine.update_command(TxId(99)),
            Err(Error::UnknownTransaction(_))
        ));
    }

    #[test]
    fn cache_cleanup_resolves_mirrors() {
        let engine = WorkerEngine::new();
        engine.running_transaction(TxId(5), Snapshot::empty());
        engine.running_transaction(TxId(9), Snapshot::empty());
        engine.clear_transactional_cache(TxId(9));
        // Tx 5 is gone and resolves as committed under the floor rule.
        assert!(engine.local().transaction(TxId(5)).is_none());
        assert!(engine.is_committed(TxId(5)));
        // Tx 9 is still mirrored and unresolved.
        assert!(engine.local().transaction(TxId(9)).is_some());
        assert!(!engine.is_committed(TxId(9)));
    }
}
