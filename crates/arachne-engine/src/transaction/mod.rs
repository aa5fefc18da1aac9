//! Transaction management.
//!
//! [`Engine`] is the coordinator-side engine: it allocates identifiers,
//! tracks the active set, and owns the commit log. [`WorkerEngine`] wraps
//! an engine on each worker and additionally mirrors transactions the
//! coordinator started.

mod engine;
mod worker;

pub use engine::{Engine, Transaction};
pub use worker::WorkerEngine;
