//! MVCC (Multi-Version Concurrency Control) primitives.
//!
//! Every vertex and edge owns a [`VersionChain`]: a newest-first list of
//! versions, each stamped with the transaction and command that created it
//! and (once superseded or deleted) the transaction and command that
//! expired it. Readers walk the chain with a [`ChainView`] and never block;
//! writers append new versions and fail fast on conflict
//! (first-writer-wins). Old versions are pruned by [`VersionChain::gc`]
//! once no live transaction can see them.

use std::collections::VecDeque;

use crate::types::{CommandId, Snapshot, TxId};
use crate::utils::error::{Error, Result};

/// A (transaction, command) pair stamped onto a version at creation or
/// expiration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    /// The stamping transaction.
    pub tx: TxId,
    /// That transaction's command counter at stamp time.
    pub cmd: CommandId,
}

impl Stamp {
    /// Creates a new stamp.
    #[must_use]
    pub const fn new(tx: TxId, cmd: CommandId) -> Self {
        Self { tx, cmd }
    }

    /// The pre-history stamp used for snapshot-loaded entities.
    pub const PRE_HISTORY: Self = Self::new(TxId::PRE_HISTORY, CommandId(0));
}

/// Answers commit-state questions about other transactions.
///
/// Implemented by both the coordinator and worker transaction engines.
/// Ids pruned below the engine's watermark count as committed unless they
/// are remembered as aborted.
pub trait TxStatus {
    /// Returns `true` when the transaction has committed.
    fn is_committed(&self, id: TxId) -> bool;

    /// Returns `true` when the transaction has aborted.
    fn is_aborted(&self, id: TxId) -> bool;
}

/// A transaction's view onto version chains: who is reading, at which
/// command, with which begin-time snapshot, and where to ask about other
/// transactions' fates.
#[derive(Clone, Copy)]
pub struct ChainView<'a> {
    /// The viewing transaction.
    pub tx: TxId,
    /// Its current command counter.
    pub cmd: CommandId,
    /// Transactions active when it began - invisible regardless of later
    /// commits.
    pub snapshot: &'a Snapshot,
    /// Commit-state oracle.
    pub status: &'a dyn TxStatus,
}

impl<'a> ChainView<'a> {
    /// Creates a view.
    #[must_use]
    pub fn new(
        tx: TxId,
        cmd: CommandId,
        snapshot: &'a Snapshot,
        status: &'a dyn TxStatus,
    ) -> Self {
        Self {
            tx,
            cmd,
            snapshot,
            status,
        }
    }

    /// Returns `true` when effects stamped `stamp` are visible to this view.
    ///
    /// Own effects become visible once the command counter has advanced
    /// past their creating command; foreign effects must come from a
    /// transaction that committed, was not active at our begin, and has a
    /// smaller id.
    #[must_use]
    pub fn sees(&self, stamp: Stamp) -> bool {
        if stamp.tx == self.tx {
            return stamp.cmd < self.cmd;
        }
        self.status.is_committed(stamp.tx)
            && !self.snapshot.contains(stamp.tx)
            && stamp.tx < self.tx
    }

    /// The stamp this view writes with.
    #[must_use]
    pub const fn stamp(&self) -> Stamp {
        Stamp::new(self.tx, self.cmd)
    }
}

/// A single version of an entity's payload.
#[derive(Debug, Clone)]
pub struct Version<T> {
    /// Who created this version, and at which command.
    pub created: Stamp,
    /// Who expired it, if anyone. `None` means live.
    pub expired: Option<Stamp>,
    /// The payload.
    pub data: T,
}

impl<T> Version<T> {
    fn new(data: T, created: Stamp) -> Self {
        Self {
            created,
            expired: None,
            data,
        }
    }
}

/// All versions of one entity, newest first.
///
/// The chain is totally ordered by creation stamp. Use
/// [`visible`](Self::visible) for reads and [`update`](Self::update) /
/// [`expire`](Self::expire) for writes; the writer methods implement the
/// optimistic first-writer-wins protocol.
#[derive(Debug, Clone)]
pub struct VersionChain<T> {
    versions: VecDeque<Version<T>>,
}

impl<T> VersionChain<T> {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self {
            versions: VecDeque::new(),
        }
    }

    /// Creates a chain holding one initial version.
    #[must_use]
    pub fn with_initial(data: T, created: Stamp) -> Self {
        let mut chain = Self::new();
        chain.versions.push_front(Version::new(data, created));
        chain
    }

    /// Number of versions in the chain.
    #[must_use]
    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    /// Returns `true` when the chain holds no versions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    /// Finds the version visible to the given view.
    ///
    /// At most one version per (transaction, command) can satisfy this: the
    /// newest one whose creator the view sees. If that version's expirer is
    /// also seen, the entity is deleted in this view and `None` is returned.
    #[must_use]
    pub fn visible(&self, view: &ChainView<'_>) -> Option<&T> {
        for version in &self.versions {
            if !view.sees(version.created) {
                continue;
            }
            let deleted = version.expired.is_some_and(|e| view.sees(e));
            return if deleted { None } else { Some(&version.data) };
        }
        None
    }

    /// Index of the newest version not created by an aborted transaction.
    fn writable_index(&self, view: &ChainView<'_>) -> Option<usize> {
        self.versions
            .iter()
            .position(|v| !view.status.is_aborted(v.created.tx))
    }

    /// Mutable access to the newest version's payload, ignoring
    /// visibility. Recovery-only: WAL replay mutates pre-history versions
    /// in place.
    pub fn newest_mut(&mut self) -> Option<&mut T> {
        self.versions.front_mut().map(|v| &mut v.data)
    }

    /// Like [`visible`](Self::visible), also yielding the creating
    /// transaction of the visible version.
    #[must_use]
    pub fn visible_with_creator(&self, view: &ChainView<'_>) -> Option<(&T, TxId)> {
        for version in &self.versions {
            if !view.sees(version.created) {
                continue;
            }
            let deleted = version.expired.is_some_and(|e| view.sees(e));
            return if deleted {
                None
            } else {
                Some((&version.data, version.created.tx))
            };
        }
        None
    }
}

impl<T: Clone> VersionChain<T> {
    /// Obtains a mutable payload for the writing view, appending a new
    /// version when the visible one belongs to another transaction.
    ///
    /// # Errors
    ///
    /// - [`Error::Serialization`] when the newest live version was produced
    ///   or expired by a concurrent transaction (active or
    ///   committed-after-our-begin). First writer wins; we are second.
    /// - [`Error::UpdateDeleted`] when the record was deleted by this
    ///   transaction or by a transaction this view sees.
    pub fn update(&mut self, view: &ChainView<'_>) -> Result<&mut T> {
        let idx = self.check_writable(view)?;
        if idx == OWN_VERSION {
            return Ok(&mut self.versions[0].data);
        }
        let stamp = view.stamp();
        let data = self.versions[idx].data.clone();
        self.versions[idx].expired = Some(stamp);
        self.versions.push_front(Version::new(data, stamp));
        Ok(&mut self.versions[0].data)
    }

    /// Expires the record for the writing view (deletion).
    ///
    /// No new version is appended; the located version is stamped expired
    /// with (tx, command). Conflict rules are the same as for
    /// [`update`](Self::update).
    ///
    /// # Errors
    ///
    /// See [`update`](Self::update).
    pub fn expire(&mut self, view: &ChainView<'_>) -> Result<()> {
        let idx = self.check_writable(view)?;
        let idx = if idx == OWN_VERSION { 0 } else { idx };
        self.versions[idx].expired = Some(view.stamp());
        Ok(())
    }

    /// Shared conflict detection for `update` and `expire`. Returns
    /// `OWN_VERSION` when the front version already belongs to the view's
    /// transaction, otherwise the index of the committed version to branch
    /// from.
    fn check_writable(&self, view: &ChainView<'_>) -> Result<usize> {
        let Some(idx) = self.writable_index(view) else {
            return Err(Error::UpdateDeleted);
        };
        let newest = &self.versions[idx];

        if newest.created.tx == view.tx {
            // Our own version; only a prior self-delete blocks us.
            if newest.expired.is_some_and(|e| e.tx == view.tx) {
                return Err(Error::UpdateDeleted);
            }
            debug_assert_eq!(idx, 0, "own version must head the chain");
            return Ok(OWN_VERSION);
        }

        if !view.sees(newest.created) {
            // Someone concurrent got here first.
            return Err(Error::Serialization);
        }

        if let Some(expired) = newest.expired {
            if expired.tx == view.tx || view.sees(expired) {
                return Err(Error::UpdateDeleted);
            }
            if !view.status.is_aborted(expired.tx) {
                // Expired by a still-active or concurrently-committed
                // transaction.
                return Err(Error::Serialization);
            }
        }
        Ok(idx)
    }

    /// Drops versions no transaction at or above `horizon` can ever see:
    /// versions created by aborted transactions, and versions expired by a
    /// committed transaction below the horizon.
    ///
    /// Returns `true` when the chain is empty afterwards and its entity can
    /// be removed from the store.
    pub fn gc(&mut self, horizon: TxId, status: &dyn TxStatus) -> bool {
        self.versions.retain(|v| {
            if status.is_aborted(v.created.tx) {
                return false;
            }
            match v.expired {
                Some(e) if status.is_committed(e.tx) && e.tx < horizon => false,
                _ => true,
            }
        });
        self.versions.is_empty()
    }
}

impl<T> Default for VersionChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Sentinel returned by `check_writable` when the front version already
/// belongs to the writer.
const OWN_VERSION: usize = usize::MAX;


#[cfg(test)]
mod prop_tests {
    use super::tests_support::*;
    use super::*;
    use proptest::prelude::*;

    /// Drives random interleavings of begins, writes, deletes, command
    /// advances, commits and aborts over a single chain and checks that
    /// no view ever resolves more than one version.
    #[derive(Debug, Clone, Copy)]
    enum Op {
        Begin,
        Update(usize),
        Expire(usize),
        Advance(usize),
        Commit(usize),
        Abort(usize),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        (0u8..6, 0usize..6).prop_map(|(kind, tx)| match kind {
            0 => Op::Begin,
            1 => Op::Update(tx),
            2 => Op::Expire(tx),
            3 => Op::Advance(tx),
            4 => Op::Commit(tx),
            _ => Op::Abort(tx),
        })
    }

    proptest! {
        #[test]
        fn at_most_one_version_visible_to_any_view(
            ops in proptest::collection::vec(op_strategy(), 1..80),
        ) {
            let mut harness = Harness::new();
            let mut chain = VersionChain::with_initial(0u64, Stamp::PRE_HISTORY);

            for op in ops {
                match op {
                    Op::Begin => harness.begin(),
                    Op::Update(i) => {
                        if let Some((view_tx, cmd, snapshot)) = harness.active(i) {
                            let view = ChainView::new(view_tx, cmd, &snapshot, &harness.status);
                            let _ = chain.update(&view);
                        }
                    }
                    Op::Expire(i) => {
                        if let Some((view_tx, cmd, snapshot)) = harness.active(i) {
                            let view = ChainView::new(view_tx, cmd, &snapshot, &harness.status);
                            let _ = chain.expire(&view);
                        }
                    }
                    Op::Advance(i) => harness.advance(i),
                    Op::Commit(i) => harness.commit(i),
                    Op::Abort(i) => harness.abort(i),
                }

                // Every live view, at every command it has reached, must
                // resolve at most one version.
                for (view_tx, max_cmd, snapshot) in harness.all_views() {
                    for cmd in 1..=max_cmd.0 {
                        let view =
                            ChainView::new(view_tx, CommandId(cmd), &snapshot, &harness.status);
                        let visible = chain
                            .versions
                            .iter()
                            .filter(|v| {
                                view.sees(v.created)
                                    && !v.expired.is_some_and(|e| view.sees(e))
                            })
                            .count();
                        prop_assert!(
                            visible <= 1,
                            "tx {view_tx} at cmd {cmd} sees {visible} versions"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests_support {
    use super::*;
    use crate::utils::hash::FxHashSet;

    /// Minimal transaction bookkeeping for the property tests: ids,
    /// snapshots, command counters, and a commit-state oracle.
    #[derive(Default)]
    pub struct OracleStatus {
        pub committed: FxHashSet<TxId>,
        pub aborted: FxHashSet<TxId>,
    }

    impl TxStatus for OracleStatus {
        fn is_committed(&self, id: TxId) -> bool {
            id == TxId::PRE_HISTORY || self.committed.contains(&id)
        }

        fn is_aborted(&self, id: TxId) -> bool {
            self.aborted.contains(&id)
        }
    }

    pub struct Harness {
        pub status: OracleStatus,
        next_id: u64,
        txs: Vec<(TxId, CommandId, Snapshot, bool)>,
    }

    impl Harness {
        pub fn new() -> Self {
            Self {
                status: OracleStatus::default(),
                next_id: 1,
                txs: Vec::new(),
            }
        }

        pub fn begin(&mut self) {
            let active: Vec<TxId> = self
                .txs
                .iter()
                .filter(|(_, _, _, live)| *live)
                .map(|(id, _, _, _)| *id)
                .collect();
            let id = TxId(self.next_id);
            self.next_id += 1;
            self.txs
                .push((id, CommandId::FIRST, Snapshot::from_ids(active), true));
        }

        pub fn active(&self, i: usize) -> Option<(TxId, CommandId, Snapshot)> {
            self.txs
                .iter()
                .filter(|(_, _, _, live)| *live)
                .nth(i)
                .map(|(id, cmd, snap, _)| (*id, *cmd, snap.clone()))
        }

        pub fn advance(&mut self, i: usize) {
            if let Some(entry) = self.txs.iter_mut().filter(|(_, _, _, live)| *live).nth(i) {
                entry.1 = CommandId(entry.1 .0 + 1);
            }
        }

        pub fn commit(&mut self, i: usize) {
            if let Some(entry) = self.txs.iter_mut().filter(|(_, _, _, live)| *live).nth(i) {
                entry.3 = false;
                self.status.committed.insert(entry.0);
            }
        }

        pub fn abort(&mut self, i: usize) {
            if let Some(entry) = self.txs.iter_mut().filter(|(_, _, _, live)| *live).nth(i) {
                entry.3 = false;
                self.status.aborted.insert(entry.0);
            }
        }

        /// Views worth checking: every transaction ever started, at its
        /// final command counter.
        pub fn all_views(&self) -> Vec<(TxId, CommandId, Snapshot)> {
            self.txs
                .iter()
                .map(|(id, cmd, snap, _)| (*id, *cmd, snap.clone()))
                .collect()
        }
    }
}
