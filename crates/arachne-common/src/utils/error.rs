//! Error types.
//!
//! The original engine signalled storage conflicts with typed exceptions;
//! here every fallible operation returns [`Result`] and the conflict kinds
//! are plain enum variants. The distributed layer maps a subset of these
//! onto the wire-level pull state.

use crate::types::TxId;
use thiserror::Error;

/// Result alias used across all Arachne crates.
pub type Result<T> = std::result::Result<T, Error>;

/// All the ways an Arachne operation can fail.
#[derive(Debug, Error)]
pub enum Error {
    /// MVCC write-write conflict: another transaction touched the record
    /// first. Retryable by the client after an abort.
    #[error("serialization conflict: record written by a concurrent transaction")]
    Serialization,

    /// Waiting on a per-record critical section took too long.
    #[error("lock wait timed out")]
    LockTimeout,

    /// A write targeted a record that a visible committed transaction
    /// already deleted.
    #[error("record was deleted by a committed transaction")]
    UpdateDeleted,

    /// A buffered element could no longer be resolved against the current
    /// transactional view.
    #[error("element could not be reconstructed in the current view")]
    Reconstruction,

    /// Vertex delete without detach while incident edges remain.
    #[error("vertex has incident edges; use detach delete")]
    AttachedVertex,

    /// Evaluator or type error during query execution.
    #[error("query error: {0}")]
    Query(String),

    /// The transaction was told to abort (deadline or external).
    #[error("transaction hinted to abort")]
    HintedAbort,

    /// Malformed segment stream; the RPC connection is torn down.
    #[error("framing error: {0}")]
    Framing(&'static str),

    /// Snapshot / WAL I/O or checksum failure.
    #[error("durability error: {0}")]
    Durability(String),

    /// An interned id with no name assigned.
    #[error("unknown identifier: {0}")]
    UnknownIdentifier(u32),

    /// Commit or abort on a transaction that is already terminal.
    #[error("transaction {0} is already finalized")]
    TransactionFinalized(TxId),

    /// The transaction id is not known to this engine.
    #[error("unknown transaction {0}")]
    UnknownTransaction(TxId),

    /// Index creation for a key that already has one. Idempotent creates
    /// treat this as success-with-a-shrug.
    #[error("index already exists")]
    IndexAlreadyExists,

    /// The index is still populating and must not serve reads.
    #[error("index is still building")]
    IndexBuilding,

    /// Wire-level decode failure on an RPC payload.
    #[error("rpc decode error: {0}")]
    RpcDecode(String),

    /// Underlying I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns `true` for conflicts the client may retry after the
    /// transaction aborts.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Serialization | Error::LockTimeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(Error::Serialization.is_retryable());
        assert!(Error::LockTimeout.is_retryable());
        assert!(!Error::UpdateDeleted.is_retryable());
        assert!(!Error::HintedAbort.is_retryable());
    }

    #[test]
    fn display_messages() {
        let err = Error::TransactionFinalized(TxId(9));
        assert_eq!(err.to_string(), "transaction 9 is already finalized");
        let err = Error::Framing("size data missing in stream");
        assert!(err.to_string().contains("size data missing"));
    }
}
