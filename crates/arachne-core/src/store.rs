//! The MVCC graph store.
//!
//! Owns the vertex and edge version chains, the interning catalogs, and
//! the secondary indexes. Every operation is parameterized by a
//! [`ChainView`] - the store itself knows nothing about transactions
//! beyond the stamps and the commit-state oracle inside the view.
//!
//! Vertices and edges live in per-kind concurrent maps keyed by local id;
//! edge endpoints and vertex edge lists store addresses, never owning
//! references, so the cyclic vertex↔edge shape never fights the borrow
//! checker.

use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use arachne_common::mvcc::{ChainView, Stamp, VersionChain};
use arachne_common::types::{
    EdgeTypeId, Gid, GlobalAddress, LabelId, PropertyId, Value, WorkerId,
};
use arachne_common::utils::error::{Error, Result};
use arachne_common::utils::hash::FxHashSet;
use arcstr::ArcStr;
use dashmap::mapref::one::RefMut;
use dashmap::try_result::TryResult;
use dashmap::DashMap;

use crate::catalog::Catalogs;
use crate::index::IndexRepo;
use crate::record::{EdgeEntry, EdgeRecord, PropertyEntry, PropertySet, VertexRecord};
use crate::vault::PropertyVault;

/// Constraint on a property inside a [`VertexFilter`].
#[derive(Debug, Clone)]
pub enum PropertyFilter {
    /// Exact match under the cross-type total order.
    Equal(Value),
    /// Range under the cross-type total order.
    Range {
        /// Lower bound.
        lower: Bound<Value>,
        /// Upper bound.
        upper: Bound<Value>,
    },
}

impl PropertyFilter {
    fn matches(&self, value: &Value) -> bool {
        if value.is_null() {
            return false;
        }
        match self {
            PropertyFilter::Equal(expected) => value.total_cmp(expected).is_eq(),
            PropertyFilter::Range { lower, upper } => {
                let lower_ok = match lower {
                    Bound::Unbounded => true,
                    Bound::Included(b) => value.total_cmp(b).is_ge(),
                    Bound::Excluded(b) => value.total_cmp(b).is_gt(),
                };
                let upper_ok = match upper {
                    Bound::Unbounded => true,
                    Bound::Included(b) => value.total_cmp(b).is_le(),
                    Bound::Excluded(b) => value.total_cmp(b).is_lt(),
                };
                lower_ok && upper_ok
            }
        }
    }
}

/// Which vertices a scan should produce.
#[derive(Debug, Clone)]
pub enum VertexFilter {
    /// Every visible vertex.
    All,
    /// Vertices carrying the label.
    Label(LabelId),
    /// Vertices carrying the label whose property satisfies the filter.
    LabelProperty {
        /// The label.
        label: LabelId,
        /// The property.
        property: PropertyId,
        /// The constraint on its value.
        filter: PropertyFilter,
    },
}

/// How long a writer waits on a contested record before giving up with
/// a lock-timeout error.
const RECORD_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

/// Acquires a record's critical section with a bounded wait.
fn lock_record<K: std::hash::Hash + Eq + Copy, V>(
    map: &DashMap<K, V>,
    key: K,
) -> Result<RefMut<'_, K, V>> {
    let deadline = Instant::now() + RECORD_LOCK_TIMEOUT;
    loop {
        match map.try_get_mut(&key) {
            TryResult::Present(guard) => return Ok(guard),
            TryResult::Absent => return Err(Error::UpdateDeleted),
            TryResult::Locked => {
                if Instant::now() >= deadline {
                    return Err(Error::LockTimeout);
                }
                std::thread::yield_now();
            }
        }
    }
}

/// The in-memory graph store of one worker.
pub struct GraphStore {
    worker_id: WorkerId,
    vertices: DashMap<Gid, VersionChain<VertexRecord>>,
    edges: DashMap<Gid, VersionChain<EdgeRecord>>,
    catalogs: Catalogs,
    indexes: IndexRepo,
    vault: Option<PropertyVault>,
    vault_names: FxHashSet<ArcStr>,
    next_gid: AtomicU64,
}

impl GraphStore {
    /// Creates an empty store owned by `worker_id`.
    #[must_use]
    pub fn new(worker_id: WorkerId) -> Self {
        Self::with_vault(worker_id, None, FxHashSet::default())
    }

    /// Creates a store whose `vault_names` properties are kept in the
    /// given vault instead of the main heap.
    #[must_use]
    pub fn with_vault(
        worker_id: WorkerId,
        vault: Option<PropertyVault>,
        vault_names: FxHashSet<ArcStr>,
    ) -> Self {
        Self {
            worker_id,
            vertices: DashMap::new(),
            edges: DashMap::new(),
            catalogs: Catalogs::new(),
            indexes: IndexRepo::new(),
            vault,
            vault_names,
            next_gid: AtomicU64::new(0),
        }
    }

    /// The owning worker's id.
    #[must_use]
    pub fn worker_id(&self) -> WorkerId {
        self.worker_id
    }

    /// The interning catalogs.
    #[must_use]
    pub fn catalogs(&self) -> &Catalogs {
        &self.catalogs
    }

    /// The index repository.
    #[must_use]
    pub fn indexes(&self) -> &IndexRepo {
        &self.indexes
    }

    /// Builds the cluster-wide address of a local entity.
    #[must_use]
    pub fn address(&self, gid: Gid) -> GlobalAddress {
        GlobalAddress::new(self.worker_id, gid)
    }

    fn allocate_gid(&self) -> Gid {
        Gid(self.next_gid.fetch_add(1, Ordering::Relaxed))
    }

    /// Makes sure future allocations land strictly above `gid`
    /// (recovery).
    pub fn note_recovered_gid(&self, gid: Gid) {
        self.next_gid.fetch_max(gid.0 + 1, Ordering::Relaxed);
    }

    // === Vertex operations ===

    /// Creates a vertex, returning its fresh local id.
    pub fn create_vertex(&self, view: &ChainView<'_>) -> Gid {
        let gid = self.allocate_gid();
        let chain = VersionChain::with_initial(VertexRecord::new(), view.stamp());
        self.vertices.insert(gid, chain);
        gid
    }

    /// Returns the vertex record visible to the view, if any.
    #[must_use]
    pub fn vertex(&self, view: &ChainView<'_>, gid: Gid) -> Option<VertexRecord> {
        self.vertices
            .get(&gid)
            .and_then(|chain| chain.visible(view).cloned())
    }

    /// Returns `true` when the vertex is visible to the view.
    #[must_use]
    pub fn vertex_exists(&self, view: &ChainView<'_>, gid: Gid) -> bool {
        self.vertices
            .get(&gid)
            .is_some_and(|chain| chain.visible(view).is_some())
    }

    /// The (old, new) version pair shipped over the wire: `new` is the
    /// visible version when the view's own transaction produced it, `old`
    /// when a committed transaction did.
    #[must_use]
    pub fn vertex_pair(
        &self,
        view: &ChainView<'_>,
        gid: Gid,
    ) -> (Option<VertexRecord>, Option<VertexRecord>) {
        match self.vertices.get(&gid) {
            Some(chain) => chain.visible_with_creator(view).map_or((None, None), |(record, creator)| {
                if creator == view.tx {
                    (None, Some(record.clone()))
                } else {
                    (Some(record.clone()), None)
                }
            }),
            None => (None, None),
        }
    }

    /// Like [`vertex_pair`](Self::vertex_pair), for edges.
    #[must_use]
    pub fn edge_pair(
        &self,
        view: &ChainView<'_>,
        gid: Gid,
    ) -> (Option<EdgeRecord>, Option<EdgeRecord>) {
        match self.edges.get(&gid) {
            Some(chain) => chain.visible_with_creator(view).map_or((None, None), |(record, creator)| {
                if creator == view.tx {
                    (None, Some(record.clone()))
                } else {
                    (Some(record.clone()), None)
                }
            }),
            None => (None, None),
        }
    }

    /// Runs a writing closure against the vertex's updatable version.
    /// Returns the closure result alongside a clone of the post-update
    /// record (for index upkeep).
    fn update_vertex<R>(
        &self,
        view: &ChainView<'_>,
        gid: Gid,
        f: impl FnOnce(&mut VertexRecord) -> R,
    ) -> Result<(R, VertexRecord)> {
        let mut chain = lock_record(&self.vertices, gid)?;
        let record = chain.update(view)?;
        let out = f(&mut *record);
        let snapshot = record.clone();
        Ok((out, snapshot))
    }

    /// Adds a label to a vertex; `Ok(false)` when it was already present.
    pub fn add_label(&self, view: &ChainView<'_>, gid: Gid, label: LabelId) -> Result<bool> {
        let (added, record) = self.update_vertex(view, gid, |r| r.add_label(label))?;
        if added {
            self.indexes.note_label(gid, label);
            for (pid, entry) in record.properties.iter() {
                if let Some(index) = self.indexes.label_property(label, pid) {
                    index.insert(self.resolve_entry(entry)?, gid);
                }
            }
        }
        Ok(added)
    }

    /// Removes a label from a vertex; `Ok(false)` when it was absent.
    pub fn remove_label(&self, view: &ChainView<'_>, gid: Gid, label: LabelId) -> Result<bool> {
        let (removed, _) = self.update_vertex(view, gid, |r| r.remove_label(label))?;
        Ok(removed)
    }

    /// Sets a property on a vertex. A `Null` value clears the slot.
    pub fn set_vertex_property(
        &self,
        view: &ChainView<'_>,
        gid: Gid,
        property: PropertyId,
        value: Value,
    ) -> Result<()> {
        if value.is_null() {
            self.remove_vertex_property(view, gid, property)?;
            return Ok(());
        }
        let entry = self.make_entry(property, &value)?;
        let (_, record) = self.update_vertex(view, gid, |r| {
            r.properties.set(property, entry);
        })?;
        self.indexes
            .note_property(gid, &record.labels, property, &value);
        Ok(())
    }

    /// Removes a property from a vertex; `Ok(false)` when it was unset.
    pub fn remove_vertex_property(
        &self,
        view: &ChainView<'_>,
        gid: Gid,
        property: PropertyId,
    ) -> Result<bool> {
        let (old, _) = self.update_vertex(view, gid, |r| r.properties.remove(property))?;
        Ok(old.is_some())
    }

    /// Reads a vertex property through the view, resolving vaulted slots.
    pub fn vertex_property(
        &self,
        view: &ChainView<'_>,
        gid: Gid,
        property: PropertyId,
    ) -> Result<Option<Value>> {
        let Some(record) = self.vertex(view, gid) else {
            return Ok(None);
        };
        match record.properties.get(property) {
            Some(entry) => Ok(Some(self.resolve_entry(entry)?)),
            None => Ok(None),
        }
    }

    /// Deletes a vertex.
    ///
    /// Without `detach`, fails with [`Error::AttachedVertex`] while
    /// incident edges remain. With `detach`, incident local edges are
    /// deleted first. Returns the gids of the edges that were deleted.
    pub fn delete_vertex(
        &self,
        view: &ChainView<'_>,
        gid: Gid,
        detach: bool,
    ) -> Result<Vec<Gid>> {
        let record = self.vertex(view, gid).ok_or(Error::UpdateDeleted)?;
        let incident: Vec<EdgeEntry> = record
            .out_edges
            .iter()
            .chain(record.in_edges.iter())
            .copied()
            .collect();

        if !incident.is_empty() && !detach {
            return Err(Error::AttachedVertex);
        }

        let mut deleted = Vec::with_capacity(incident.len());
        for entry in incident {
            if !entry.edge.is_local_to(self.worker_id) {
                return Err(Error::Query(format!(
                    "cannot detach non-local edge {}",
                    entry.edge
                )));
            }
            // A cycle shows up in both lists but must be deleted once.
            if deleted.contains(&entry.edge.gid) {
                continue;
            }
            self.delete_edge(view, entry.edge.gid)?;
            deleted.push(entry.edge.gid);
        }

        let mut chain = lock_record(&self.vertices, gid)?;
        chain.expire(view)?;
        Ok(deleted)
    }

    // === Edge operations ===

    /// Creates an edge between two local vertices.
    ///
    /// Both endpoint records gain a new version carrying the edge entry.
    pub fn create_edge(
        &self,
        view: &ChainView<'_>,
        from: GlobalAddress,
        to: GlobalAddress,
        edge_type: EdgeTypeId,
    ) -> Result<Gid> {
        if !from.is_local_to(self.worker_id) || !to.is_local_to(self.worker_id) {
            return Err(Error::Query(
                "edge endpoints must be local to this worker".into(),
            ));
        }

        let gid = self.allocate_gid();
        let edge_addr = self.address(gid);
        let chain = VersionChain::with_initial(EdgeRecord::new(edge_type, from, to), view.stamp());
        self.edges.insert(gid, chain);

        let out_entry = EdgeEntry {
            edge: edge_addr,
            peer: to,
            edge_type,
        };
        let in_entry = EdgeEntry {
            edge: edge_addr,
            peer: from,
            edge_type,
        };

        if from.gid == to.gid {
            self.update_vertex(view, from.gid, |r| {
                r.out_edges.push(out_entry);
                r.in_edges.push(in_entry);
            })?;
        } else {
            // Touch endpoints in gid order so concurrent edge creations
            // between the same pair cannot deadlock on the map shards.
            let (first, second) = if from.gid < to.gid {
                (from.gid, to.gid)
            } else {
                (to.gid, from.gid)
            };
            for gid in [first, second] {
                self.update_vertex(view, gid, |r| {
                    if gid == from.gid {
                        r.out_edges.push(out_entry);
                    } else {
                        r.in_edges.push(in_entry);
                    }
                })?;
            }
        }
        Ok(gid)
    }

    /// Returns the edge record visible to the view, if any.
    #[must_use]
    pub fn edge(&self, view: &ChainView<'_>, gid: Gid) -> Option<EdgeRecord> {
        self.edges
            .get(&gid)
            .and_then(|chain| chain.visible(view).cloned())
    }

    /// Deletes an edge: removes it from both endpoint edge lists (as new
    /// endpoint versions) and expires the edge's own chain.
    pub fn delete_edge(&self, view: &ChainView<'_>, gid: Gid) -> Result<()> {
        let record = self.edge(view, gid).ok_or(Error::UpdateDeleted)?;

        let mut endpoints = vec![record.from.gid];
        if record.to.gid != record.from.gid {
            endpoints.push(record.to.gid);
        }
        endpoints.sort_unstable();
        for vertex in endpoints {
            self.update_vertex(view, vertex, |r| {
                r.out_edges.retain(|e| e.edge.gid != gid);
                r.in_edges.retain(|e| e.edge.gid != gid);
            })?;
        }

        let mut chain = lock_record(&self.edges, gid)?;
        chain.expire(view)?;
        Ok(())
    }

    /// Sets a property on an edge. A `Null` value clears the slot.
    pub fn set_edge_property(
        &self,
        view: &ChainView<'_>,
        gid: Gid,
        property: PropertyId,
        value: Value,
    ) -> Result<()> {
        let entry = if value.is_null() {
            None
        } else {
            Some(self.make_entry(property, &value)?)
        };
        let mut chain = lock_record(&self.edges, gid)?;
        let record = chain.update(view)?;
        match entry {
            Some(entry) => {
                record.properties.set(property, entry);
            }
            None => {
                record.properties.remove(property);
            }
        }
        Ok(())
    }

    /// Removes a property from an edge; `Ok(false)` when it was unset.
    pub fn remove_edge_property(
        &self,
        view: &ChainView<'_>,
        gid: Gid,
        property: PropertyId,
    ) -> Result<bool> {
        let mut chain = lock_record(&self.edges, gid)?;
        let record = chain.update(view)?;
        Ok(record.properties.remove(property).is_some())
    }

    /// Reads an edge property through the view, resolving vaulted slots.
    pub fn edge_property(
        &self,
        view: &ChainView<'_>,
        gid: Gid,
        property: PropertyId,
    ) -> Result<Option<Value>> {
        let Some(record) = self.edge(view, gid) else {
            return Ok(None);
        };
        match record.properties.get(property) {
            Some(entry) => Ok(Some(self.resolve_entry(entry)?)),
            None => Ok(None),
        }
    }

    // === Property vault plumbing ===

    fn make_entry(&self, property: PropertyId, value: &Value) -> Result<PropertyEntry> {
        if let Some(vault) = &self.vault {
            let name = self.catalogs.property_name(property)?;
            if self.vault_names.contains(&name) {
                let offset = vault.append(value)?;
                return Ok(PropertyEntry::OnDisk(offset));
            }
        }
        Ok(PropertyEntry::Inline(value.clone()))
    }

    /// Resolves a property slot to its value, reading the vault if needed.
    pub fn resolve_entry(&self, entry: &PropertyEntry) -> Result<Value> {
        match entry {
            PropertyEntry::Inline(value) => Ok(value.clone()),
            PropertyEntry::OnDisk(offset) => match &self.vault {
                Some(vault) => vault.read(*offset),
                None => Err(Error::Durability(
                    "vaulted property but no vault configured".into(),
                )),
            },
        }
    }

    /// Produces a copy of the property set with every slot inlined, for
    /// snapshots and the wire.
    pub fn resolve_properties(&self, properties: &PropertySet) -> Result<PropertySet> {
        properties
            .iter()
            .map(|(pid, entry)| Ok((pid, PropertyEntry::Inline(self.resolve_entry(entry)?))))
            .collect()
    }

    // === Scans ===

    /// Visible vertices matching the filter.
    ///
    /// Uses a ready index when one covers the filter, falling back to a
    /// full scan otherwise (building indexes are never consulted). Index
    /// hits are revalidated against the view before being returned.
    pub fn vertices(&self, view: &ChainView<'_>, filter: &VertexFilter) -> Result<Vec<Gid>> {
        match filter {
            VertexFilter::All => {
                let mut gids: Vec<Gid> = self
                    .vertices
                    .iter()
                    .filter(|e| e.value().visible(view).is_some())
                    .map(|e| *e.key())
                    .collect();
                gids.sort_unstable();
                Ok(gids)
            }
            VertexFilter::Label(label) => {
                if let Some(index) = self.indexes.ready_label(*label) {
                    Ok(index
                        .candidates()
                        .into_iter()
                        .filter(|gid| {
                            self.vertex(view, *gid)
                                .is_some_and(|r| r.has_label(*label))
                        })
                        .collect())
                } else {
                    let mut gids: Vec<Gid> = self
                        .vertices
                        .iter()
                        .filter(|e| {
                            e.value()
                                .visible(view)
                                .is_some_and(|r| r.has_label(*label))
                        })
                        .map(|e| *e.key())
                        .collect();
                    gids.sort_unstable();
                    Ok(gids)
                }
            }
            VertexFilter::LabelProperty {
                label,
                property,
                filter,
            } => self.vertices_by_label_property(view, *label, *property, filter),
        }
    }

    fn vertices_by_label_property(
        &self,
        view: &ChainView<'_>,
        label: LabelId,
        property: PropertyId,
        filter: &PropertyFilter,
    ) -> Result<Vec<Gid>> {
        let candidates: Vec<(Value, Gid)> =
            if let Some(index) = self.indexes.ready_label_property(label, property) {
                match filter {
                    PropertyFilter::Equal(value) => index
                        .equal(value)
                        .into_iter()
                        .map(|gid| (value.clone(), gid))
                        .collect(),
                    PropertyFilter::Range { lower, upper } => index.range(lower, upper),
                }
            } else {
                // Full scan ordered by value (gid breaks ties).
                let mut hits: Vec<(Value, Gid)> = Vec::new();
                for entry in self.vertices.iter() {
                    let gid = *entry.key();
                    let Some(record) = entry.value().visible(view) else {
                        continue;
                    };
                    if !record.has_label(label) {
                        continue;
                    }
                    let Some(slot) = record.properties.get(property) else {
                        continue;
                    };
                    let value = self.resolve_entry(slot)?;
                    if filter.matches(&value) {
                        hits.push((value, gid));
                    }
                }
                hits.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                hits
            };

        // Revalidate index hits: the entry may predate a delete, a label
        // removal or a property change in our view.
        let mut out = Vec::with_capacity(candidates.len());
        for (_, gid) in candidates {
            let Some(record) = self.vertex(view, gid) else {
                continue;
            };
            if !record.has_label(label) {
                continue;
            }
            let Some(slot) = record.properties.get(property) else {
                continue;
            };
            let current = self.resolve_entry(slot)?;
            if filter.matches(&current) && !out.contains(&gid) {
                out.push(gid);
            }
        }
        Ok(out)
    }

    /// Visible edges, ascending by gid.
    #[must_use]
    pub fn edges(&self, view: &ChainView<'_>) -> Vec<Gid> {
        let mut gids: Vec<Gid> = self
            .edges
            .iter()
            .filter(|e| e.value().visible(view).is_some())
            .map(|e| *e.key())
            .collect();
        gids.sort_unstable();
        gids
    }

    /// Number of vertices visible to the view.
    #[must_use]
    pub fn vertex_count(&self, view: &ChainView<'_>) -> usize {
        self.vertices
            .iter()
            .filter(|e| e.value().visible(view).is_some())
            .count()
    }

    /// Number of edges visible to the view.
    #[must_use]
    pub fn edge_count(&self, view: &ChainView<'_>) -> usize {
        self.edges
            .iter()
            .filter(|e| e.value().visible(view).is_some())
            .count()
    }

    // === Indexes ===

    /// Builds an index: create in `building`, scan the view's vertices,
    /// flip to `ready`. Returns `Ok(false)` when the index already exists.
    pub fn build_index(
        &self,
        view: &ChainView<'_>,
        label: LabelId,
        property: Option<PropertyId>,
    ) -> Result<bool> {
        tracing::debug!("building index on label {:?} property {:?}", label, property);
        // Backfill in ascending gid order: gids allocate sequentially, so
        // this reproduces insertion order for the tie-break.
        let mut gids: Vec<Gid> = self.vertices.iter().map(|e| *e.key()).collect();
        gids.sort_unstable();
        match property {
            None => {
                let Some(index) = self.indexes.create_label(label) else {
                    return Ok(false);
                };
                for gid in gids {
                    if self
                        .vertex(view, gid)
                        .is_some_and(|r| r.has_label(label))
                    {
                        index.insert(gid);
                    }
                }
                index.mark_ready();
                Ok(true)
            }
            Some(property) => {
                let Some(index) = self.indexes.create_label_property(label, property) else {
                    return Ok(false);
                };
                for gid in gids {
                    let Some(record) = self.vertex(view, gid) else {
                        continue;
                    };
                    if !record.has_label(label) {
                        continue;
                    }
                    if let Some(slot) = record.properties.get(property) {
                        index.insert(self.resolve_entry(slot)?, gid);
                    }
                }
                index.mark_ready();
                Ok(true)
            }
        }
    }

    // === Garbage collection ===

    /// Prunes versions unreachable below the oldest-active horizon and
    /// drops index entries for vertices that vanished entirely.
    pub fn gc(&self, horizon: arachne_common::types::TxId, status: &dyn arachne_common::mvcc::TxStatus) {
        self.vertices.retain(|_, chain| !chain.gc(horizon, status));
        self.edges.retain(|_, chain| !chain.gc(horizon, status));

        let (labels, pairs) = self.indexes.definitions();
        for label in labels {
            if let Some(index) = self.indexes.label(label) {
                index.retain(|gid| self.vertices.contains_key(gid));
            }
        }
        for (label, property) in pairs {
            if let Some(index) = self.indexes.label_property(label, property) {
                index.retain(|_, gid| self.vertices.contains_key(gid));
            }
        }
    }

    // === Recovery plumbing ===

    /// Installs a vertex recovered from a snapshot or the WAL replayer,
    /// stamped as pre-history so it is visible to every transaction.
    pub fn install_vertex(&self, gid: Gid, record: VertexRecord) {
        self.note_recovered_gid(gid);
        self.vertices
            .insert(gid, VersionChain::with_initial(record, Stamp::PRE_HISTORY));
    }

    /// Installs an edge recovered from a snapshot or the WAL replayer.
    pub fn install_edge(&self, gid: Gid, record: EdgeRecord) {
        self.note_recovered_gid(gid);
        self.edges
            .insert(gid, VersionChain::with_initial(record, Stamp::PRE_HISTORY));
    }

    /// Mutates an installed vertex in place during WAL replay. The replayed
    /// transaction is known committed, so no new version is needed.
    pub fn replay_vertex_update(&self, gid: Gid, f: impl FnOnce(&mut VertexRecord)) -> Result<()> {
        let mut chain = self.vertices.get_mut(&gid).ok_or(Error::UpdateDeleted)?;
        match chain.newest_mut() {
            Some(record) => {
                f(record);
                Ok(())
            }
            None => Err(Error::UpdateDeleted),
        }
    }

    /// Mutates an installed edge in place during WAL replay.
    pub fn replay_edge_update(&self, gid: Gid, f: impl FnOnce(&mut EdgeRecord)) -> Result<()> {
        let mut chain = self.edges.get_mut(&gid).ok_or(Error::UpdateDeleted)?;
        match chain.newest_mut() {
            Some(record) => {
                f(record);
                Ok(())
            }
            None => Err(Error::UpdateDeleted),
        }
    }

    /// Drops a vertex chain outright during WAL replay of a committed
    /// delete.
    pub fn replay_remove_vertex(&self, gid: Gid) {
        self.vertices.remove(&gid);
    }

    /// Drops an edge chain outright during WAL replay of a committed
    /// delete.
    pub fn replay_remove_edge(&self, gid: Gid) {
        self.edges.remove(&gid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arachne_common::mvcc::TxStatus;
    use arachne_common::types::{CommandId, Snapshot, TxId};
    use parking_lot::Mutex;

    /// Tiny stand-in for the transaction engine.
    #[derive(Default)]
    struct Statuses {
        committed: Mutex<FxHashSet<TxId>>,
        aborted: Mutex<FxHashSet<TxId>>,
    }

    impl Statuses {
        fn commit(&self, id: u64) {
            self.committed.lock().insert(TxId(id));
        }
    }

    impl TxStatus for Statuses {
        fn is_committed(&self, id: TxId) -> bool {
            id == TxId::PRE_HISTORY || self.committed.lock().contains(&id)
        }

        fn is_aborted(&self, id: TxId) -> bool {
            self.aborted.lock().contains(&id)
        }
    }

    fn view<'a>(tx: u64, cmd: u64, snap: &'a Snapshot, status: &'a Statuses) -> ChainView<'a> {
        ChainView::new(TxId(tx), CommandId(cmd), snap, status)
    }

    /// Creates a store with one committed transaction's worth of data:
    /// two Person vertices connected by a KNOWS edge.
    fn seeded() -> (GraphStore, Statuses, Gid, Gid, Gid) {
        let store = GraphStore::new(WorkerId(0));
        let status = Statuses::default();
        let empty = Snapshot::empty();
        let v = view(1, 1, &empty, &status);

        let person = store.catalogs().label("Person");
        let age = store.catalogs().property("age");
        let knows = store.catalogs().edge_type("KNOWS");

        let alice = store.create_vertex(&v);
        store.add_label(&v, alice, person).unwrap();
        store
            .set_vertex_property(&v, alice, age, Value::from(30i64))
            .unwrap();
        let bob = store.create_vertex(&v);
        store.add_label(&v, bob, person).unwrap();
        let edge = store
            .create_edge(&v, store.address(alice), store.address(bob), knows)
            .unwrap();
        status.commit(1);
        (store, status, alice, bob, edge)
    }

    #[test]
    fn create_and_read_back() {
        let (store, status, alice, bob, edge) = seeded();
        let empty = Snapshot::empty();
        let v = view(2, 1, &empty, &status);

        let record = store.vertex(&v, alice).unwrap();
        assert_eq!(record.out_edges.len(), 1);
        assert_eq!(record.out_edges[0].peer.gid, bob);
        let edge_record = store.edge(&v, edge).unwrap();
        assert_eq!(edge_record.from.gid, alice);
        assert_eq!(edge_record.to.gid, bob);
        assert_eq!(store.vertex_count(&v), 2);
        assert_eq!(store.edge_count(&v), 1);
    }

    #[test]
    fn uncommitted_writes_invisible_to_others() {
        let (store, status, alice, _, _) = seeded();
        let empty = Snapshot::empty();
        let writer = view(2, 1, &empty, &status);
        let name = store.catalogs().property("name");
        store
            .set_vertex_property(&writer, alice, name, Value::from("Alice"))
            .unwrap();

        let reader = view(3, 1, &empty, &status);
        assert_eq!(store.vertex_property(&reader, alice, name).unwrap(), None);
        // The writer itself sees it after a command advance.
        let writer_later = view(2, 2, &empty, &status);
        assert_eq!(
            store.vertex_property(&writer_later, alice, name).unwrap(),
            Some(Value::from("Alice"))
        );
    }

    #[test]
    fn delete_without_detach_fails_on_attached_vertex() {
        let (store, status, alice, _, _) = seeded();
        let empty = Snapshot::empty();
        let v = view(2, 1, &empty, &status);
        assert!(matches!(
            store.delete_vertex(&v, alice, false),
            Err(Error::AttachedVertex)
        ));
    }

    #[test]
    fn detach_delete_removes_incident_edges() {
        let (store, status, alice, bob, edge) = seeded();
        let empty = Snapshot::empty();
        let v = view(2, 1, &empty, &status);

        let deleted = store.delete_vertex(&v, alice, true).unwrap();
        assert_eq!(deleted, vec![edge]);
        status.commit(2);

        let reader = view(3, 1, &empty, &status);
        assert!(store.vertex(&reader, alice).is_none());
        assert!(store.edge(&reader, edge).is_none());
        // Bob survives, with an empty in-list.
        let bob_record = store.vertex(&reader, bob).unwrap();
        assert!(bob_record.in_edges.is_empty());
    }

    #[test]
    fn delete_edge_updates_both_endpoints() {
        let (store, status, alice, bob, edge) = seeded();
        let empty = Snapshot::empty();
        let v = view(2, 1, &empty, &status);
        store.delete_edge(&v, edge).unwrap();
        status.commit(2);

        let reader = view(3, 1, &empty, &status);
        assert!(store.edge(&reader, edge).is_none());
        assert!(store.vertex(&reader, alice).unwrap().out_edges.is_empty());
        assert!(store.vertex(&reader, bob).unwrap().in_edges.is_empty());
    }

    #[test]
    fn self_loop_create_and_detach() {
        let store = GraphStore::new(WorkerId(0));
        let status = Statuses::default();
        let empty = Snapshot::empty();
        let v = view(1, 1, &empty, &status);
        let t = store.catalogs().edge_type("SELF");

        let vertex = store.create_vertex(&v);
        let addr = store.address(vertex);
        let edge = store.create_edge(&v, addr, addr, t).unwrap();
        status.commit(1);

        let v2 = view(2, 1, &empty, &status);
        let record = store.vertex(&v2, vertex).unwrap();
        assert_eq!(record.out_edges.len(), 1);
        assert_eq!(record.in_edges.len(), 1);

        let deleted = store.delete_vertex(&v2, vertex, true).unwrap();
        assert_eq!(deleted, vec![edge]);
    }

    #[test]
    fn concurrent_writers_conflict() {
        let (store, status, alice, _, _) = seeded();
        let empty = Snapshot::empty();
        let age = store.catalogs().property_id("age").unwrap();

        // T2 and T3 both started after tx 1 committed; T2 writes first
        // and commits, T3 had T2 in its begin snapshot.
        let t2 = view(2, 1, &empty, &status);
        store
            .set_vertex_property(&t2, alice, age, Value::from(31i64))
            .unwrap();
        status.commit(2);

        let snap = Snapshot::from_ids(vec![TxId(2)]);
        let t3 = view(3, 1, &snap, &status);
        let err = store
            .set_vertex_property(&t3, alice, age, Value::from(32i64))
            .unwrap_err();
        assert!(matches!(err, Error::Serialization));
    }

    #[test]
    fn label_scan_with_and_without_index() {
        let (store, status, alice, bob, _) = seeded();
        let empty = Snapshot::empty();
        let person = store.catalogs().label_id("Person").unwrap();

        let v = view(2, 1, &empty, &status);
        let scanned = store.vertices(&v, &VertexFilter::Label(person)).unwrap();
        assert_eq!(scanned, vec![alice, bob]);

        assert!(store.build_index(&v, person, None).unwrap());
        // Second create reports "already exists".
        assert!(!store.build_index(&v, person, None).unwrap());

        let indexed = store.vertices(&v, &VertexFilter::Label(person)).unwrap();
        assert_eq!(indexed, vec![alice, bob]);
    }

    #[test]
    fn label_property_range_scan() {
        let store = GraphStore::new(WorkerId(0));
        let status = Statuses::default();
        let empty = Snapshot::empty();
        let v = view(1, 1, &empty, &status);
        let person = store.catalogs().label("Person");
        let age = store.catalogs().property("age");

        // Ages [null, 10, 20, 20, 30] in insertion order.
        let mut gids = Vec::new();
        for value in [
            Value::Null,
            Value::from(10i64),
            Value::from(20i64),
            Value::from(20i64),
            Value::from(30i64),
        ] {
            let gid = store.create_vertex(&v);
            store.add_label(&v, gid, person).unwrap();
            if !value.is_null() {
                store.set_vertex_property(&v, gid, age, value).unwrap();
            }
            gids.push(gid);
        }
        status.commit(1);

        let v2 = view(2, 1, &empty, &status);
        assert!(store.build_index(&v2, person, Some(age)).unwrap());

        let filter = VertexFilter::LabelProperty {
            label: person,
            property: age,
            filter: PropertyFilter::Range {
                lower: Bound::Included(Value::from(15i64)),
                upper: Bound::Excluded(Value::from(25i64)),
            },
        };
        let hits = store.vertices(&v2, &filter).unwrap();
        assert_eq!(hits, vec![gids[2], gids[3]]);
    }

    #[test]
    fn index_equals_filtered_scan() {
        let (store, status, ..) = seeded();
        let empty = Snapshot::empty();
        let person = store.catalogs().label_id("Person").unwrap();
        let age = store.catalogs().property_id("age").unwrap();

        let filter = VertexFilter::LabelProperty {
            label: person,
            property: age,
            filter: PropertyFilter::Equal(Value::from(30i64)),
        };
        let v = view(2, 1, &empty, &status);
        let scan = store.vertices(&v, &filter).unwrap();

        let v_build = view(2, 1, &empty, &status);
        store.build_index(&v_build, person, Some(age)).unwrap();
        let indexed = store.vertices(&v, &filter).unwrap();
        assert_eq!(scan, indexed);
    }

    #[test]
    fn index_revalidates_against_view() {
        let (store, status, alice, _, _) = seeded();
        let empty = Snapshot::empty();
        let person = store.catalogs().label_id("Person").unwrap();
        let age = store.catalogs().property_id("age").unwrap();

        let v = view(2, 1, &empty, &status);
        store.build_index(&v, person, Some(age)).unwrap();

        // Tx 3 bumps alice's age and commits; the stale entry for 30 must
        // not surface alice for a [30, 30] query in a later view.
        let t3 = view(3, 1, &empty, &status);
        store
            .set_vertex_property(&t3, alice, age, Value::from(99i64))
            .unwrap();
        status.commit(3);

        let t4 = view(4, 1, &empty, &status);
        let filter = VertexFilter::LabelProperty {
            label: person,
            property: age,
            filter: PropertyFilter::Equal(Value::from(30i64)),
        };
        assert!(store.vertices(&t4, &filter).unwrap().is_empty());
        let filter99 = VertexFilter::LabelProperty {
            label: person,
            property: age,
            filter: PropertyFilter::Equal(Value::from(99i64)),
        };
        assert_eq!(store.vertices(&t4, &filter99).unwrap(), vec![alice]);
    }

    #[test]
    fn gc_drops_dead_chains_and_index_entries() {
        let (store, status, alice, _, _) = seeded();
        let empty = Snapshot::empty();
        let person = store.catalogs().label_id("Person").unwrap();

        let v = view(2, 1, &empty, &status);
        store.build_index(&v, person, None).unwrap();
        store.delete_vertex(&v, alice, true).unwrap();
        status.commit(2);

        store.gc(TxId(10), &status);
        let reader = view(11, 1, &empty, &status);
        assert_eq!(store.vertex_count(&reader), 1);
        let index = store.indexes().ready_label(person).unwrap();
        assert!(!index.candidates().contains(&alice));
    }

    #[test]
    fn vaulted_properties_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let vault = PropertyVault::open(dir.path().join("props.vault")).unwrap();
        let mut names = FxHashSet::default();
        names.insert(ArcStr::from("blob"));
        let store = GraphStore::with_vault(WorkerId(0), Some(vault), names);

        let status = Statuses::default();
        let empty = Snapshot::empty();
        let v = view(1, 1, &empty, &status);
        let blob = store.catalogs().property("blob");
        let small = store.catalogs().property("small");

        let gid = store.create_vertex(&v);
        store
            .set_vertex_property(&v, gid, blob, Value::from("out of heap"))
            .unwrap();
        store
            .set_vertex_property(&v, gid, small, Value::from(7i64))
            .unwrap();
        status.commit(1);

        let reader = view(2, 1, &empty, &status);
        let record = store.vertex(&reader, gid).unwrap();
        // The vaulted slot holds an offset, not the value.
        assert!(record.properties.get_inline(blob).is_none());
        assert_eq!(
            store.vertex_property(&reader, gid, blob).unwrap(),
            Some(Value::from("out of heap"))
        );
        assert_eq!(
            store.vertex_property(&reader, gid, small).unwrap(),
            Some(Value::from(7i64))
        );
    }
}
