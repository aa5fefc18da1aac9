//! Versioned payloads for vertices and edges.
//!
//! These are the `T` inside the MVCC version chains. They are plain data:
//! updating one clones the visible version and mutates the clone, so keep
//! them cheap to copy - properties are reference-counted values and label
//! sets sit inline in a `SmallVec`.

use arachne_common::types::{EdgeTypeId, GlobalAddress, LabelId, PropertyId, Value};
use arachne_common::utils::hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// One property slot: the value itself, or an offset into the property
/// vault for names configured to live out of the main heap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyEntry {
    /// Value stored inline in the record.
    Inline(Value),
    /// Value stored in the process-local property vault at this offset.
    OnDisk(u64),
}

/// The property map carried by every vertex and edge version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertySet {
    entries: FxHashMap<PropertyId, PropertyEntry>,
}

impl PropertySet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a property slot, returning the previous one.
    pub fn set(&mut self, id: PropertyId, entry: PropertyEntry) -> Option<PropertyEntry> {
        self.entries.insert(id, entry)
    }

    /// Removes a property slot.
    pub fn remove(&mut self, id: PropertyId) -> Option<PropertyEntry> {
        self.entries.remove(&id)
    }

    /// Returns the slot for a property, if set.
    #[must_use]
    pub fn get(&self, id: PropertyId) -> Option<&PropertyEntry> {
        self.entries.get(&id)
    }

    /// Returns the inline value for a property; `None` for unset slots
    /// *and* for vaulted slots (those must be resolved by the store).
    #[must_use]
    pub fn get_inline(&self, id: PropertyId) -> Option<&Value> {
        match self.entries.get(&id) {
            Some(PropertyEntry::Inline(value)) => Some(value),
            _ => None,
        }
    }

    /// Returns `true` when the property is set.
    #[must_use]
    pub fn contains(&self, id: PropertyId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no properties are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates (id, slot) pairs in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = (PropertyId, &PropertyEntry)> {
        self.entries.iter().map(|(id, entry)| (*id, entry))
    }
}

impl FromIterator<(PropertyId, PropertyEntry)> for PropertySet {
    fn from_iter<I: IntoIterator<Item = (PropertyId, PropertyEntry)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// One slot in a vertex's edge list.
///
/// Stores addresses, never owning references - the edge and the peer
/// vertex are looked up through the store (or the remote cache) when
/// traversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeEntry {
    /// Address of the edge itself.
    pub edge: GlobalAddress,
    /// Address of the vertex on the other end.
    pub peer: GlobalAddress,
    /// The edge's type.
    pub edge_type: EdgeTypeId,
}

/// Payload of one vertex version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VertexRecord {
    /// Labels, as interned ids.
    pub labels: SmallVec<[LabelId; 4]>,
    /// Properties.
    pub properties: PropertySet,
    /// Outgoing edges, in insertion order.
    pub out_edges: Vec<EdgeEntry>,
    /// Incoming edges, in insertion order.
    pub in_edges: Vec<EdgeEntry>,
}

impl VertexRecord {
    /// Creates an empty vertex record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the vertex carries the label.
    #[must_use]
    pub fn has_label(&self, label: LabelId) -> bool {
        self.labels.contains(&label)
    }

    /// Adds a label; returns `false` when it was already present.
    pub fn add_label(&mut self, label: LabelId) -> bool {
        if self.has_label(label) {
            return false;
        }
        self.labels.push(label);
        true
    }

    /// Removes a label; returns `false` when it was not present.
    pub fn remove_label(&mut self, label: LabelId) -> bool {
        match self.labels.iter().position(|l| *l == label) {
            Some(idx) => {
                self.labels.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Total number of incident edges.
    #[must_use]
    pub fn degree(&self) -> usize {
        self.out_edges.len() + self.in_edges.len()
    }
}

/// Payload of one edge version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// The edge's type.
    pub edge_type: EdgeTypeId,
    /// Source vertex address.
    pub from: GlobalAddress,
    /// Target vertex address.
    pub to: GlobalAddress,
    /// Properties.
    pub properties: PropertySet,
}

impl EdgeRecord {
    /// Creates an edge record between two vertices.
    #[must_use]
    pub fn new(edge_type: EdgeTypeId, from: GlobalAddress, to: GlobalAddress) -> Self {
        Self {
            edge_type,
            from,
            to,
            properties: PropertySet::new(),
        }
    }

    /// Returns `true` when both endpoints are the same vertex.
    #[must_use]
    pub fn is_cycle(&self) -> bool {
        self.from == self.to
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arachne_common::types::{Gid, WorkerId};

    fn addr(gid: u64) -> GlobalAddress {
        GlobalAddress::new(WorkerId(0), Gid(gid))
    }

    #[test]
    fn label_add_remove() {
        let mut record = VertexRecord::new();
        assert!(record.add_label(LabelId(1)));
        assert!(!record.add_label(LabelId(1)));
        assert!(record.has_label(LabelId(1)));
        assert!(record.remove_label(LabelId(1)));
        assert!(!record.remove_label(LabelId(1)));
    }

    #[test]
    fn property_slots() {
        let mut props = PropertySet::new();
        props.set(PropertyId(0), PropertyEntry::Inline(Value::from(1i64)));
        props.set(PropertyId(1), PropertyEntry::OnDisk(128));
        assert_eq!(props.get_inline(PropertyId(0)), Some(&Value::from(1i64)));
        assert_eq!(props.get_inline(PropertyId(1)), None);
        assert!(props.contains(PropertyId(1)));
        assert_eq!(props.remove(PropertyId(0)), Some(PropertyEntry::Inline(Value::from(1i64))));
        assert_eq!(props.len(), 1);
    }

    #[test]
    fn cycle_detection() {
        let edge = EdgeRecord::new(EdgeTypeId(0), addr(3), addr(3));
        assert!(edge.is_cycle());
        let edge = EdgeRecord::new(EdgeTypeId(0), addr(3), addr(4));
        assert!(!edge.is_cycle());
    }
}
