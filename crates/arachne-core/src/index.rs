//! Secondary indexes: label, and label + property.
//!
//! Both index kinds have a lifecycle: created in `Building` while the
//! existing graph is scanned in, then flipped to `Ready`. Reads must never
//! consult a building index - the store falls back to a full scan until
//! the flip. Index entries are only ever *added*; a lookup revalidates
//! visibility and the current property value against the store, and GC is
//! the one that eventually drops stale entries.

use std::ops::Bound;
use std::sync::atomic::{AtomicU8, Ordering};

use arachne_common::types::{Gid, LabelId, PropertyId, Value};
use dashmap::DashMap;
use parking_lot::RwLock;

/// Lifecycle of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// Populating; queries must not use it.
    Building,
    /// Fully populated and usable.
    Ready,
}

const STATE_BUILDING: u8 = 0;
const STATE_READY: u8 = 1;

/// Label index: every vertex that ever carried the label, in insertion
/// order.
#[derive(Debug)]
pub struct LabelIndex {
    state: AtomicU8,
    entries: RwLock<Vec<Gid>>,
}

impl LabelIndex {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_BUILDING),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> IndexState {
        match self.state.load(Ordering::Acquire) {
            STATE_READY => IndexState::Ready,
            _ => IndexState::Building,
        }
    }

    /// Flips the index to ready once the backfill scan is done.
    pub fn mark_ready(&self) {
        self.state.store(STATE_READY, Ordering::Release);
    }

    /// Records a vertex under this label.
    pub fn insert(&self, gid: Gid) {
        let mut entries = self.entries.write();
        if !entries.contains(&gid) {
            entries.push(gid);
        }
    }

    /// All recorded vertices, in insertion order. Callers revalidate
    /// against the store.
    #[must_use]
    pub fn candidates(&self) -> Vec<Gid> {
        self.entries.read().clone()
    }

    /// Drops entries the caller proved dead.
    pub fn retain(&self, keep: impl FnMut(&Gid) -> bool) {
        self.entries.write().retain(keep);
    }
}

/// One entry in a label+property index: the indexed value and the vertex.
#[derive(Debug, Clone)]
struct ValueEntry {
    value: Value,
    gid: Gid,
}

/// Label + property index: vertices keyed by property value, iterated in
/// value order with insertion order breaking ties.
#[derive(Debug)]
pub struct LabelPropertyIndex {
    state: AtomicU8,
    entries: RwLock<Vec<ValueEntry>>,
}

impl LabelPropertyIndex {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(STATE_BUILDING),
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> IndexState {
        match self.state.load(Ordering::Acquire) {
            STATE_READY => IndexState::Ready,
            _ => IndexState::Building,
        }
    }

    /// Flips the index to ready once the backfill scan is done.
    pub fn mark_ready(&self) {
        self.state.store(STATE_READY, Ordering::Release);
    }

    /// Records a (value, vertex) pair. Null values are never indexed -
    /// no equality or range filter can match them.
    pub fn insert(&self, value: Value, gid: Gid) {
        if value.is_null() {
            return;
        }
        let mut entries = self.entries.write();
        if entries
            .iter()
            .any(|e| e.gid == gid && e.value.total_cmp(&value).is_eq())
        {
            return;
        }
        // Insert after all entries that sort at or before the new value,
        // keeping equal values in insertion order.
        let at = entries.partition_point(|e| e.value.total_cmp(&value).is_le());
        entries.insert(at, ValueEntry { value, gid });
    }

    /// Vertices whose indexed value equals `value`, in insertion order.
    #[must_use]
    pub fn equal(&self, value: &Value) -> Vec<Gid> {
        self.entries
            .read()
            .iter()
            .filter(|e| e.value.total_cmp(value).is_eq())
            .map(|e| e.gid)
            .collect()
    }

    /// Vertices whose indexed value falls in the given bounds, in value
    /// order (insertion order within equal values).
    #[must_use]
    pub fn range(&self, lower: &Bound<Value>, upper: &Bound<Value>) -> Vec<(Value, Gid)> {
        let lower_ok = |v: &Value| match lower {
            Bound::Unbounded => true,
            Bound::Included(b) => v.total_cmp(b).is_ge(),
            Bound::Excluded(b) => v.total_cmp(b).is_gt(),
        };
        let upper_ok = |v: &Value| match upper {
            Bound::Unbounded => true,
            Bound::Included(b) => v.total_cmp(b).is_le(),
            Bound::Excluded(b) => v.total_cmp(b).is_lt(),
        };
        self.entries
            .read()
            .iter()
            .filter(|e| lower_ok(&e.value) && upper_ok(&e.value))
            .map(|e| (e.value.clone(), e.gid))
            .collect()
    }

    /// Drops entries the caller proved dead.
    pub fn retain(&self, mut keep: impl FnMut(&Value, &Gid) -> bool) {
        self.entries.write().retain(|e| keep(&e.value, &e.gid));
    }
}

/// All secondary indexes of one store, keyed by their definition.
#[derive(Debug, Default)]
pub struct IndexRepo {
    label: DashMap<LabelId, std::sync::Arc<LabelIndex>>,
    label_property: DashMap<(LabelId, PropertyId), std::sync::Arc<LabelPropertyIndex>>,
}

impl IndexRepo {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a label index in building state. Returns `None` when one
    /// already exists (creation is idempotent at the caller).
    pub fn create_label(&self, label: LabelId) -> Option<std::sync::Arc<LabelIndex>> {
        let mut created = None;
        self.label.entry(label).or_insert_with(|| {
            let index = std::sync::Arc::new(LabelIndex::new());
            created = Some(index.clone());
            index
        });
        created
    }

    /// Creates a label+property index in building state. Returns `None`
    /// when one already exists.
    pub fn create_label_property(
        &self,
        label: LabelId,
        property: PropertyId,
    ) -> Option<std::sync::Arc<LabelPropertyIndex>> {
        let mut created = None;
        self.label_property.entry((label, property)).or_insert_with(|| {
            let index = std::sync::Arc::new(LabelPropertyIndex::new());
            created = Some(index.clone());
            index
        });
        created
    }

    /// The label index for `label`, whatever its state.
    #[must_use]
    pub fn label(&self, label: LabelId) -> Option<std::sync::Arc<LabelIndex>> {
        self.label.get(&label).map(|e| e.value().clone())
    }

    /// The label index for `label`, only when ready.
    #[must_use]
    pub fn ready_label(&self, label: LabelId) -> Option<std::sync::Arc<LabelIndex>> {
        self.label(label).filter(|i| i.state() == IndexState::Ready)
    }

    /// The label+property index for the pair, whatever its state.
    #[must_use]
    pub fn label_property(
        &self,
        label: LabelId,
        property: PropertyId,
    ) -> Option<std::sync::Arc<LabelPropertyIndex>> {
        self.label_property
            .get(&(label, property))
            .map(|e| e.value().clone())
    }

    /// The label+property index for the pair, only when ready.
    #[must_use]
    pub fn ready_label_property(
        &self,
        label: LabelId,
        property: PropertyId,
    ) -> Option<std::sync::Arc<LabelPropertyIndex>> {
        self.label_property(label, property)
            .filter(|i| i.state() == IndexState::Ready)
    }

    /// Notes a vertex gaining a label (backfills every matching index).
    pub fn note_label(&self, gid: Gid, label: LabelId) {
        if let Some(index) = self.label(label) {
            index.insert(gid);
        }
    }

    /// Notes a vertex (with its labels) gaining a property value.
    pub fn note_property(&self, gid: Gid, labels: &[LabelId], property: PropertyId, value: &Value) {
        for label in labels {
            if let Some(index) = self.label_property(*label, property) {
                index.insert(value.clone(), gid);
            }
        }
    }

    /// Defined index keys, for snapshot persistence: labels, then
    /// (label, property) pairs.
    #[must_use]
    pub fn definitions(&self) -> (Vec<LabelId>, Vec<(LabelId, PropertyId)>) {
        let mut labels: Vec<_> = self.label.iter().map(|e| *e.key()).collect();
        labels.sort_unstable();
        let mut pairs: Vec<_> = self.label_property.iter().map(|e| *e.key()).collect();
        pairs.sort_unstable();
        (labels, pairs)
    }
}
