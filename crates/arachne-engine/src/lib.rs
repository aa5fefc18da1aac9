//! The ArachneDB database engine.
//!
//! Start with [`Database`] - it owns the graph store, the transaction
//! engine, the durability layer and the maintenance threads. Grab a
//! [`DatabaseAccessor`] via [`Database::access`] to read and write the
//! graph inside a transaction.

pub mod accessor;
pub mod config;
pub mod database;
pub mod durability;
pub mod maintenance;
pub mod transaction;

pub use accessor::{EdgeAccessor, VertexAccessor};
pub use config::Config;
pub use database::{Database, DatabaseAccessor, EngineKind};
pub use transaction::{Engine, Transaction, WorkerEngine};
