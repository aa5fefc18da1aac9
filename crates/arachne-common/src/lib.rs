//! Shared vocabulary for ArachneDB.
//!
//! Everything that more than one crate needs lives here: the typed
//! identifiers ([`types`]), the dynamic property [`Value`](types::Value),
//! the MVCC version chain ([`mvcc`]), and the error types ([`utils::error`]).

pub mod mvcc;
pub mod types;
pub mod utils;
