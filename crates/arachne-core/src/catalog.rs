//! Interning tables for labels, edge types and property names.
//!
//! Names are interned once and referenced by compact integer ids
//! everywhere else - in records, indexes, WAL entries and on the wire.
//! Ids are append-only and stable for the process lifetime; the tables
//! themselves are persisted alongside snapshots.

use arachne_common::types::{EdgeTypeId, LabelId, PropertyId};
use arachne_common::utils::error::{Error, Result};
use arachne_common::utils::hash::FxHashMap;
use arcstr::ArcStr;
use parking_lot::RwLock;

/// One append-only name ↔ id table.
///
/// Both directions are kept: a map for name lookups and a dense vector
/// for id lookups. The two are always updated together under the write
/// lock.
#[derive(Debug, Default)]
pub struct NameCatalog {
    name_to_id: RwLock<FxHashMap<ArcStr, u32>>,
    id_to_name: RwLock<Vec<ArcStr>>,
}

impl NameCatalog {
    /// Creates an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the id for `name`, interning it if this is the first time
    /// the name is seen.
    pub fn get_or_intern(&self, name: &str) -> u32 {
        if let Some(id) = self.name_to_id.read().get(name) {
            return *id;
        }
        let mut forward = self.name_to_id.write();
        // Somebody may have interned it between the two locks.
        if let Some(id) = forward.get(name) {
            return *id;
        }
        let mut backward = self.id_to_name.write();
        let id = backward.len() as u32;
        let name = ArcStr::from(name);
        backward.push(name.clone());
        forward.insert(name, id);
        id
    }

    /// Returns the id for `name` without interning.
    #[must_use]
    pub fn id(&self, name: &str) -> Option<u32> {
        self.name_to_id.read().get(name).copied()
    }

    /// Returns the name assigned to `id`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnknownIdentifier`] when the id was never
    /// assigned.
    pub fn name(&self, id: u32) -> Result<ArcStr> {
        self.id_to_name
            .read()
            .get(id as usize)
            .cloned()
            .ok_or(Error::UnknownIdentifier(id))
    }

    /// Installs a (name, id) pair recovered from a snapshot or the WAL.
    ///
    /// Gaps are not allowed to stay unnamed for long - recovery replays
    /// the full table - but out-of-order arrival is tolerated by padding
    /// with placeholders that later installs overwrite.
    pub fn install(&self, name: &str, id: u32) {
        let mut forward = self.name_to_id.write();
        let mut backward = self.id_to_name.write();
        let idx = id as usize;
        while backward.len() <= idx {
            backward.push(ArcStr::new());
        }
        let name = ArcStr::from(name);
        backward[idx] = name.clone();
        forward.insert(name, id);
    }

    /// Number of interned names.
    #[must_use]
    pub fn len(&self) -> usize {
        self.id_to_name.read().len()
    }

    /// Returns `true` when nothing has been interned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.id_to_name.read().is_empty()
    }

    /// Dumps the table in id order, for snapshotting.
    #[must_use]
    pub fn dump(&self) -> Vec<ArcStr> {
        self.id_to_name.read().clone()
    }
}

/// The three interning tables a graph carries.
#[derive(Debug, Default)]
pub struct Catalogs {
    labels: NameCatalog,
    edge_types: NameCatalog,
    properties: NameCatalog,
}

impl Catalogs {
    /// Creates empty catalogs.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a label name.
    pub fn label(&self, name: &str) -> LabelId {
        LabelId(self.labels.get_or_intern(name))
    }

    /// Looks up a label name without interning.
    #[must_use]
    pub fn label_id(&self, name: &str) -> Option<LabelId> {
        self.labels.id(name).map(LabelId)
    }

    /// Resolves a label id to its name.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnknownIdentifier`] for unassigned ids.
    pub fn label_name(&self, id: LabelId) -> Result<ArcStr> {
        self.labels.name(id.0)
    }

    /// Interns an edge-type name.
    pub fn edge_type(&self, name: &str) -> EdgeTypeId {
        EdgeTypeId(self.edge_types.get_or_intern(name))
    }

    /// Looks up an edge-type name without interning.
    #[must_use]
    pub fn edge_type_id(&self, name: &str) -> Option<EdgeTypeId> {
        self.edge_types.id(name).map(EdgeTypeId)
    }

    /// Resolves an edge-type id to its name.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnknownIdentifier`] for unassigned ids.
    pub fn edge_type_name(&self, id: EdgeTypeId) -> Result<ArcStr> {
        self.edge_types.name(id.0)
    }

    /// Interns a property name.
    pub fn property(&self, name: &str) -> PropertyId {
        PropertyId(self.properties.get_or_intern(name))
    }

    /// Looks up a property name without interning.
    #[must_use]
    pub fn property_id(&self, name: &str) -> Option<PropertyId> {
        self.properties.id(name).map(PropertyId)
    }

    /// Resolves a property id to its name.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnknownIdentifier`] for unassigned ids.
    pub fn property_name(&self, id: PropertyId) -> Result<ArcStr> {
        self.properties.name(id.0)
    }

    /// Raw access to the label table (snapshot / recovery plumbing).
    #[must_use]
    pub fn labels(&self) -> &NameCatalog {
        &self.labels
    }

    /// Raw access to the edge-type table.
    #[must_use]
    pub fn edge_types(&self) -> &NameCatalog {
        &self.edge_types
    }

    /// Raw access to the property table.
    #[must_use]
    pub fn properties(&self) -> &NameCatalog {
        &self.properties
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let catalog = NameCatalog::new();
        let a = catalog.get_or_intern("Person");
        let b = catalog.get_or_intern("Person");
        let c = catalog.get_or_intern("Company");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn ids_are_dense_and_stable() {
        let catalog = NameCatalog::new();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            assert_eq!(catalog.get_or_intern(name), i as u32);
        }
        assert_eq!(catalog.name(1).unwrap(), "b");
    }

    #[test]
    fn unknown_id_fails() {
        let catalog = NameCatalog::new();
        assert!(matches!(
            catalog.name(7),
            Err(Error::UnknownIdentifier(7))
        ));
    }

    #[test]
    fn install_out_of_order() {
        let catalog = NameCatalog::new();
        catalog.install("third", 2);
        catalog.install("first", 0);
        catalog.install("second", 1);
        assert_eq!(catalog.name(0).unwrap(), "first");
        assert_eq!(catalog.name(2).unwrap(), "third");
        assert_eq!(catalog.id("second"), Some(1));
        // New interns continue after the installed range.
        assert_eq!(catalog.get_or_intern("fourth"), 3);
    }

    #[test]
    fn typed_catalogs() {
        let catalogs = Catalogs::new();
        let person = catalogs.label("Person");
        let knows = catalogs.edge_type("KNOWS");
        let age = catalogs.property("age");
        assert_eq!(catalogs.label_name(person).unwrap(), "Person");
        assert_eq!(catalogs.edge_type_name(knows).unwrap(), "KNOWS");
        assert_eq!(catalogs.property_name(age).unwrap(), "age");
        assert_eq!(catalogs.label_id("Person"), Some(person));
        assert_eq!(catalogs.label_id("Ghost"), None);
    }
}
