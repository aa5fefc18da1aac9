//! Vertex and edge accessors.
//!
//! An accessor is (global address, transactional view): a cheap value
//! type that resolves to the visible version on every read and produces a
//! new version on every write. Local addresses resolve against the graph
//! store; non-local ones against the remote-record cache the pull client
//! fills. Equality is address equality.

use std::fmt;

use arachne_common::types::{Gid, GlobalAddress, Value};
use arachne_common::utils::error::{Error, Result};
use arachne_core::record::{EdgeRecord, PropertyEntry, VertexRecord};
use arcstr::ArcStr;

use crate::database::DatabaseAccessor;

/// Accessor for one vertex.
#[derive(Clone, Copy)]
pub struct VertexAccessor<'a> {
    address: GlobalAddress,
    dba: &'a DatabaseAccessor,
}

impl<'a> VertexAccessor<'a> {
    /// Binds an accessor to an address.
    #[must_use]
    pub fn new(address: GlobalAddress, dba: &'a DatabaseAccessor) -> Self {
        Self { address, dba }
    }

    /// The vertex's cluster-wide address.
    #[must_use]
    pub fn address(&self) -> GlobalAddress {
        self.address
    }

    /// The vertex's worker-local id.
    #[must_use]
    pub fn gid(&self) -> Gid {
        self.address.gid
    }

    /// Returns `true` when the vertex lives on this worker.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.address.is_local_to(self.dba.worker_id())
    }

    /// The visible record.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Reconstruction`] when the vertex is not
    /// resolvable in the current view - deleted locally, or absent from
    /// the remote cache.
    pub fn record(&self) -> Result<VertexRecord> {
        if self.is_local() {
            self.dba
                .store()
                .vertex(&self.dba.view(), self.address.gid)
                .ok_or(Error::Reconstruction)
        } else {
            self.dba
                .remote()
                .vertex(self.dba.tx_id(), self.address.gid)
                .ok_or(Error::Reconstruction)
        }
    }

    /// Re-resolves the vertex in the current view; the reconstruction
    /// step of accumulated pulls.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Reconstruction`] when it is gone.
    pub fn reconstruct(&self) -> Result<()> {
        self.record().map(|_| ())
    }

    /// The vertex's label names.
    ///
    /// # Errors
    ///
    /// Propagates resolution and catalog errors.
    pub fn labels(&self) -> Result<Vec<ArcStr>> {
        let record = self.record()?;
        record
            .labels
            .iter()
            .map(|id| self.dba.label_name(*id))
            .collect()
    }

    /// Returns `true` when the vertex carries the label.
    ///
    /// # Errors
    ///
    /// Propagates resolution errors.
    pub fn has_label(&self, name: &str) -> Result<bool> {
        let Some(label) = self.dba.store().catalogs().label_id(name) else {
            return Ok(false);
        };
        Ok(self.record()?.has_label(label))
    }

    /// Adds a label.
    ///
    /// # Errors
    ///
    /// Propagates store conflicts and WAL errors.
    pub fn add_label(&self, name: &str) -> Result<bool> {
        let label = self.dba.label(name);
        if self.is_local() {
            let added = self
                .dba
                .store()
                .add_label(&self.dba.view(), self.address.gid, label)?;
            if added {
                self.dba.log(crate::durability::WalOp::AddLabel {
                    gid: self.address.gid,
                    label,
                    name: ArcStr::from(name),
                })?;
            }
            Ok(added)
        } else {
            let mut added = false;
            let updated = self
                .dba
                .remote()
                .update_vertex(self.dba.tx_id(), self.address.gid, |r| {
                    added = r.add_label(label);
                });
            if updated {
                Ok(added)
            } else {
                Err(Error::Reconstruction)
            }
        }
    }

    /// Removes a label.
    ///
    /// # Errors
    ///
    /// Propagates store conflicts and WAL errors.
    pub fn remove_label(&self, name: &str) -> Result<bool> {
        let label = self.dba.label(name);
        if self.is_local() {
            let removed =
                self.dba
                    .store()
                    .remove_label(&self.dba.view(), self.address.gid, label)?;
            if removed {
                self.dba.log(crate::durability::WalOp::RemoveLabel {
                    gid: self.address.gid,
                    label,
                    name: ArcStr::from(name),
                })?;
            }
            Ok(removed)
        } else {
            let mut removed = false;
            let updated = self
                .dba
                .remote()
                .update_vertex(self.dba.tx_id(), self.address.gid, |r| {
                    removed = r.remove_label(label);
                });
            if updated {
                Ok(removed)
            } else {
                Err(Error::Reconstruction)
            }
        }
    }

    /// Reads a property; unset slots read as `Null`.
    ///
    /// # Errors
    ///
    /// Propagates resolution errors.
    pub fn property(&self, name: &str) -> Result<Value> {
        let Some(property) = self.dba.store().catalogs().property_id(name) else {
            return Ok(Value::Null);
        };
        if self.is_local() {
            // Resolving through the store reads deleted vertices as
            // absent; distinguish that from an unset slot.
            if !self
                .dba
                .store()
                .vertex_exists(&self.dba.view(), self.address.gid)
            {
                return Err(Error::Reconstruction);
            }
            Ok(self
                .dba
                .store()
                .vertex_property(&self.dba.view(), self.address.gid, property)?
                .unwrap_or(Value::Null))
        } else {
            let record = self.record()?;
            match record.properties.get(property) {
                Some(entry) => self.dba.store().resolve_entry(entry),
                None => Ok(Value::Null),
            }
        }
    }

    /// Sets a property; `Null` clears it.
    ///
    /// # Errors
    ///
    /// Propagates store conflicts and WAL errors.
    pub fn set_property(&self, name: &str, value: Value) -> Result<()> {
        let property = self.dba.property(name);
        if self.is_local() {
            self.dba.store().set_vertex_property(
                &self.dba.view(),
                self.address.gid,
                property,
                value.clone(),
            )?;
            self.dba.log(crate::durability::WalOp::SetProperty {
                owner: crate::durability::WalOwner::Vertex,
                gid: self.address.gid,
                property,
                name: ArcStr::from(name),
                value,
            })?;
            Ok(())
        } else {
            let updated = self
                .dba
                .remote()
                .update_vertex(self.dba.tx_id(), self.address.gid, |r| {
                    if value.is_null() {
                        r.properties.remove(property);
                    } else {
                        r.properties.set(property, PropertyEntry::Inline(value.clone()));
                    }
                });
            if updated {
                Ok(())
            } else {
                Err(Error::Reconstruction)
            }
        }
    }

    /// Removes a property.
    ///
    /// # Errors
    ///
    /// Propagates store conflicts and WAL errors.
    pub fn remove_property(&self, name: &str) -> Result<bool> {
        let property = self.dba.property(name);
        if self.is_local() {
            let removed = self.dba.store().remove_vertex_property(
                &self.dba.view(),
                self.address.gid,
                property,
            )?;
            if removed {
                self.dba.log(crate::durability::WalOp::RemoveProperty {
                    owner: crate::durability::WalOwner::Vertex,
                    gid: self.address.gid,
                    property,
                    name: ArcStr::from(name),
                })?;
            }
            Ok(removed)
        } else {
            let mut removed = false;
            let updated = self
                .dba
                .remote()
                .update_vertex(self.dba.tx_id(), self.address.gid, |r| {
                    removed = r.properties.remove(property).is_some();
                });
            if updated {
                Ok(removed)
            } else {
                Err(Error::Reconstruction)
            }
        }
    }

    /// Outgoing edges, in insertion order.
    ///
    /// # Errors
    ///
    /// Propagates resolution errors.
    pub fn out_edges(&self) -> Result<Vec<EdgeAccessor<'a>>> {
        Ok(self
            .record()?
            .out_edges
            .iter()
            .map(|e| EdgeAccessor::new(e.edge, self.dba))
            .collect())
    }

    /// Incoming edges, in insertion order.
    ///
    /// # Errors
    ///
    /// Propagates resolution errors.
    pub fn in_edges(&self) -> Result<Vec<EdgeAccessor<'a>>> {
        Ok(self
            .record()?
            .in_edges
            .iter()
            .map(|e| EdgeAccessor::new(e.edge, self.dba))
            .collect())
    }

    /// Total number of incident edges.
    ///
    /// # Errors
    ///
    /// Propagates resolution errors.
    pub fn degree(&self) -> Result<usize> {
        Ok(self.record()?.degree())
    }
}

impl PartialEq for VertexAccessor<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for VertexAccessor<'_> {}

impl fmt::Debug for VertexAccessor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VertexAccessor({})", self.address)
    }
}

/// Accessor for one edge.
#[derive(Clone, Copy)]
pub struct EdgeAccessor<'a> {
    address: GlobalAddress,
    dba: &'a DatabaseAccessor,
}

impl<'a> EdgeAccessor<'a> {
    /// Binds an accessor to an address.
    #[must_use]
    pub fn new(address: GlobalAddress, dba: &'a DatabaseAccessor) -> Self {
        Self { address, dba }
    }

    /// The edge's cluster-wide address.
    #[must_use]
    pub fn address(&self) -> GlobalAddress {
        self.address
    }

    /// The edge's worker-local id.
    #[must_use]
    pub fn gid(&self) -> Gid {
        self.address.gid
    }

    /// Returns `true` when the edge lives on this worker.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.address.is_local_to(self.dba.worker_id())
    }

    /// The visible record.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Reconstruction`] when the edge is not
    /// resolvable in the current view.
    pub fn record(&self) -> Result<EdgeRecord> {
        if self.is_local() {
            self.dba
                .store()
                .edge(&self.dba.view(), self.address.gid)
                .ok_or(Error::Reconstruction)
        } else {
            self.dba
                .remote()
                .edge(self.dba.tx_id(), self.address.gid)
                .ok_or(Error::Reconstruction)
        }
    }

    /// Re-resolves the edge in the current view.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Reconstruction`] when it is gone.
    pub fn reconstruct(&self) -> Result<()> {
        self.record().map(|_| ())
    }

    /// The edge's type name.
    ///
    /// # Errors
    ///
    /// Propagates resolution and catalog errors.
    pub fn edge_type_name(&self) -> Result<ArcStr> {
        let record = self.record()?;
        self.dba.edge_type_name(record.edge_type)
    }

    /// The source vertex.
    ///
    /// # Errors
    ///
    /// Propagates resolution errors.
    pub fn from(&self) -> Result<VertexAccessor<'a>> {
        Ok(VertexAccessor::new(self.record()?.from, self.dba))
    }

    /// The target vertex.
    ///
    /// # Errors
    ///
    /// Propagates resolution errors.
    pub fn to(&self) -> Result<VertexAccessor<'a>> {
        Ok(VertexAccessor::new(self.record()?.to, self.dba))
    }

    /// Returns `true` when source and target are the same vertex.
    ///
    /// # Errors
    ///
    /// Propagates resolution errors.
    pub fn is_cycle(&self) -> Result<bool> {
        Ok(self.record()?.is_cycle())
    }

    /// Reads a property; unset slots read as `Null`.
    ///
    /// # Errors
    ///
    /// Propagates resolution errors.
    pub fn property(&self, name: &str) -> Result<Value> {
        let Some(property) = self.dba.store().catalogs().property_id(name) else {
            return Ok(Value::Null);
        };
        let record = self.record()?;
        match record.properties.get(property) {
            Some(entry) => self.dba.store().resolve_entry(entry),
            None => Ok(Value::Null),
        }
    }

    /// Sets a property; `Null` clears it.
    ///
    /// # Errors
    ///
    /// Propagates store conflicts and WAL errors; non-local edges are
    /// read-only through this accessor.
    pub fn set_property(&self, name: &str, value: Value) -> Result<()> {
        if !self.is_local() {
            return Err(Error::Query("non-local edges are read-only".into()));
        }
        let property = self.dba.property(name);
        self.dba.store().set_edge_property(
            &self.dba.view(),
            self.address.gid,
            property,
            value.clone(),
        )?;
        self.dba.log(crate::durability::WalOp::SetProperty {
            owner: crate::durability::WalOwner::Edge,
            gid: self.address.gid,
            property,
            name: ArcStr::from(name),
            value,
        })?;
        Ok(())
    }

    /// Removes a property.
    ///
    /// # Errors
    ///
    /// Propagates store conflicts and WAL errors.
    pub fn remove_property(&self, name: &str) -> Result<bool> {
        if !self.is_local() {
            return Err(Error::Query("non-local edges are read-only".into()));
        }
        let property = self.dba.property(name);
        let removed =
            self.dba
                .store()
                .remove_edge_property(&self.dba.view(), self.address.gid, property)?;
        if removed {
            self.dba.log(crate::durability::WalOp::RemoveProperty {
                owner: crate::durability::WalOwner::Edge,
                gid: self.address.gid,
                property,
                name: ArcStr::from(name),
            })?;
        }
        Ok(removed)
    }
}

impl PartialEq for EdgeAccessor<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for EdgeAccessor<'_> {}

impl fmt::Debug for EdgeAccessor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EdgeAccessor({})", self.address)
    }
}

impl fmt::Display for EdgeAccessor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.edge_type_name() {
            Ok(name) => write!(f, "E[{name}]"),
            Err(_) => write!(f, "E[{}]", self.address),
        }
    }
}
