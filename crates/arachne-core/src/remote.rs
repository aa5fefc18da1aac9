//! Coordinator-side cache of records fetched from other workers.
//!
//! Remote-pull responses carry vertex/edge version pairs next to the
//! frames that reference them. They land here, keyed by transaction and
//! the entity's worker-local id, and accessors resolve non-local
//! addresses against this cache. Entries are purged en bloc when the
//! transaction advances its command (newly visible versions must be
//! refetched) and when it ends.

use arachne_common::types::{Gid, TxId};
use arachne_common::utils::hash::FxHashMap;
use dashmap::DashMap;

use crate::record::{EdgeRecord, VertexRecord};

/// The (old, new) version pair a worker shipped for one entity.
///
/// `old` is the version visible before the owning transaction's writes,
/// `new` the version the transaction itself produced (if any).
#[derive(Debug, Clone, Default)]
pub struct CachedPair<T> {
    /// Last committed version, if requested and present.
    pub old: Option<T>,
    /// The transaction's own version, if requested and present.
    pub new: Option<T>,
}

impl<T> CachedPair<T> {
    /// The record an accessor should read: the transaction's own version
    /// when there is one, the committed one otherwise.
    #[must_use]
    pub fn current(&self) -> Option<&T> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

/// Per-transaction caches for vertices and edges fetched from workers.
#[derive(Debug, Default)]
pub struct RemoteDataManager {
    vertices: DashMap<TxId, FxHashMap<Gid, CachedPair<VertexRecord>>>,
    edges: DashMap<TxId, FxHashMap<Gid, CachedPair<EdgeRecord>>>,
}

impl RemoteDataManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts (or replaces) the cached pair for a vertex.
    pub fn insert_vertex(
        &self,
        tx: TxId,
        gid: Gid,
        old: Option<VertexRecord>,
        new: Option<VertexRecord>,
    ) {
        self.vertices
            .entry(tx)
            .or_default()
            .insert(gid, CachedPair { old, new });
    }

    /// Inserts (or replaces) the cached pair for an edge.
    pub fn insert_edge(
        &self,
        tx: TxId,
        gid: Gid,
        old: Option<EdgeRecord>,
        new: Option<EdgeRecord>,
    ) {
        self.edges
            .entry(tx)
            .or_default()
            .insert(gid, CachedPair { old, new });
    }

    /// Reads the current cached vertex record, if present.
    #[must_use]
    pub fn vertex(&self, tx: TxId, gid: Gid) -> Option<VertexRecord> {
        self.vertices
            .get(&tx)
            .and_then(|m| m.get(&gid).and_then(|p| p.current().cloned()))
    }

    /// Reads the current cached edge record, if present.
    #[must_use]
    pub fn edge(&self, tx: TxId, gid: Gid) -> Option<EdgeRecord> {
        self.edges
            .get(&tx)
            .and_then(|m| m.get(&gid).and_then(|p| p.current().cloned()))
    }

    /// Applies a mutation to the cached new version of a vertex, creating
    /// it from the old version first if needed. Returns `false` when the
    /// entity is not cached at all.
    pub fn update_vertex(
        &self,
        tx: TxId,
        gid: Gid,
        f: impl FnOnce(&mut VertexRecord),
    ) -> bool {
        let Some(mut cache) = self.vertices.get_mut(&tx) else {
            return false;
        };
        let Some(pair) = cache.get_mut(&gid) else {
            return false;
        };
        if pair.new.is_none() {
            pair.new = pair.old.clone();
        }
        match pair.new.as_mut() {
            Some(record) => {
                f(record);
                true
            }
            None => false,
        }
    }

    /// Drops everything cached for a transaction. Called on command
    /// advance and at transaction end.
    pub fn clear_transaction(&self, tx: TxId) {
        self.vertices.remove(&tx);
        self.edges.remove(&tx);
    }

    /// Drops caches of transactions whose id is below the published
    /// oldest-active horizon.
    pub fn clear_below(&self, horizon: TxId) {
        self.vertices.retain(|tx, _| *tx >= horizon);
        self.edges.retain(|tx, _| *tx >= horizon);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::VertexRecord;
    use arachne_common::types::LabelId;

    #[test]
    fn current_prefers_new() {
        let mut old = VertexRecord::new();
        old.add_label(LabelId(0));
        let mut new = VertexRecord::new();
        new.add_label(LabelId(1));

        let manager = RemoteDataManager::new();
        manager.insert_vertex(TxId(1), Gid(5), Some(old), Some(new));
        let seen = manager.vertex(TxId(1), Gid(5)).unwrap();
        assert!(seen.has_label(LabelId(1)));
    }

    #[test]
    fn update_materializes_new_from_old() {
        let manager = RemoteDataManager::new();
        manager.insert_vertex(TxId(1), Gid(5), Some(VertexRecord::new()), None);
        assert!(manager.update_vertex(TxId(1), Gid(5), |r| {
            r.add_label(LabelId(2));
        }));
        assert!(manager.vertex(TxId(1), Gid(5)).unwrap().has_label(LabelId(2)));
        // Unknown entities are not updatable.
        assert!(!manager.update_vertex(TxId(1), Gid(9), |_| {}));
    }

    #[test]
    fn clear_on_command_advance() {
        let manager = RemoteDataManager::new();
        manager.insert_vertex(TxId(1), Gid(5), Some(VertexRecord::new()), None);
        manager.insert_vertex(TxId(2), Gid(6), Some(VertexRecord::new()), None);
        manager.clear_transaction(TxId(1));
        assert!(manager.vertex(TxId(1), Gid(5)).is_none());
        assert!(manager.vertex(TxId(2), Gid(6)).is_some());
    }

    #[test]
    fn clear_below_horizon() {
        let manager = RemoteDataManager::new();
        for tx in 1..=3 {
            manager.insert_vertex(TxId(tx), Gid(tx), Some(VertexRecord::new()), None);
        }
        manager.clear_below(TxId(3));
        assert!(manager.vertex(TxId(1), Gid(1)).is_none());
        assert!(manager.vertex(TxId(2), Gid(2)).is_none());
        assert!(manager.vertex(TxId(3), Gid(3)).is_some());
    }
}
