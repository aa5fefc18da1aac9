//! Durability: snapshots, the write-ahead log, and recovery.
//!
//! Periodic [`snapshot`]s capture a consistent image of the graph;
//! the [`wal`] records every mutation between them; [`recovery`] replays
//! snapshot + committed WAL suffix at startup. No committed data is lost.

pub mod recovery;
pub mod snapshot;
pub mod wal;

pub use recovery::{recover, RecoveryInfo};
pub use wal::{WalEntry, WalManager, WalOp, WalOwner};
