//! The in-memory graph store.
//!
//! This is where vertices and edges actually live: MVCC version chains
//! keyed by local id ([`store::GraphStore`]), the label / edge-type /
//! property-name interning tables ([`catalog`]), the secondary indexes
//! ([`index`]), and the coordinator-side cache of records fetched from
//! other workers ([`remote`]).

pub mod catalog;
pub mod index;
pub mod record;
pub mod remote;
pub mod store;
pub mod vault;

pub use record::{EdgeEntry, EdgeRecord, PropertySet, VertexRecord};
pub use store::{GraphStore, PropertyFilter, VertexFilter};
