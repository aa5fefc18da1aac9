//! RPC message types for the remote-pull protocol.
//!
//! Everything here is bincode-encoded and wrapped in the segment framing
//! of [`framing`](crate::framing) on the wire. Frames reference vertices
//! and edges by global address; the version payloads travel in a side
//! channel next to them and land in the coordinator's remote-record
//! cache.

use arachne_common::types::{GlobalAddress, Snapshot, TxId, Value, WorkerId};
use arachne_common::utils::error::Error;
use arachne_core::record::{EdgeRecord, VertexRecord};
use serde::{Deserialize, Serialize};

use crate::plan::{Parameters, PlanId, Symbol};

/// State of a remote cursor after a pull.
///
/// Everything except [`CursorInProgress`](Self::CursorInProgress) is
/// terminal and sticky: once entered, every later pull for the same
/// (transaction, plan) returns it unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PullState {
    /// The cursor has more rows.
    CursorInProgress,
    /// The cursor ran dry.
    CursorExhausted,
    /// An MVCC write-write conflict aborted the fragment.
    SerializationError,
    /// A per-record wait timed out.
    LockTimeoutError,
    /// A write targeted a visibly deleted record.
    UpdateDeletedError,
    /// A buffered element could not be re-resolved.
    ReconstructionError,
    /// A vertex delete found remaining edges.
    UnableToDeleteVertexError,
    /// Evaluator or type error.
    QueryError,
    /// Deadline or external abort.
    HintedAbortError,
}

impl PullState {
    /// Returns `true` for every state a pull cannot continue past.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != PullState::CursorInProgress
    }

    /// Returns `true` for the error states.
    #[must_use]
    pub fn is_error(self) -> bool {
        self.is_terminal() && self != PullState::CursorExhausted
    }

    /// Maps a cursor-side error onto the wire state.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        match error {
            Error::Serialization => PullState::SerializationError,
            Error::LockTimeout => PullState::LockTimeoutError,
            Error::UpdateDeleted => PullState::UpdateDeletedError,
            Error::Reconstruction => PullState::ReconstructionError,
            Error::AttachedVertex => PullState::UnableToDeleteVertexError,
            Error::HintedAbort => PullState::HintedAbortError,
            _ => PullState::QueryError,
        }
    }
}

/// One value inside a result frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FrameValue {
    /// A plain value.
    Value(Value),
    /// A vertex, by address; its versions travel in the side channel.
    Vertex(GlobalAddress),
    /// An edge, by address.
    Edge(GlobalAddress),
    /// A path: vertices and the edges between them, by address.
    Path {
        /// The path's vertices, in order.
        vertices: Vec<GlobalAddress>,
        /// The edges between consecutive vertices.
        edges: Vec<GlobalAddress>,
    },
}

/// Side-channel payload for one vertex referenced by a frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VertexPayload {
    /// The vertex's address.
    pub address: GlobalAddress,
    /// Last committed version, when `send_old` was set.
    pub old: Option<VertexRecord>,
    /// The pulling transaction's own version, when `send_new` was set.
    pub new: Option<VertexRecord>,
}

/// Side-channel payload for one edge referenced by a frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgePayload {
    /// The edge's address.
    pub address: GlobalAddress,
    /// Last committed version, when `send_old` was set.
    pub old: Option<EdgeRecord>,
    /// The pulling transaction's own version, when `send_new` was set.
    pub new: Option<EdgeRecord>,
}

/// A remote-pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePullReq {
    /// The driving transaction.
    pub tx_id: TxId,
    /// Its begin snapshot, so the worker can mirror the transaction
    /// without an extra round trip.
    pub tx_snapshot: Snapshot,
    /// Which installed plan to execute.
    pub plan_id: PlanId,
    /// Parameter bag for the plan.
    pub params: Parameters,
    /// The frame slots to ship back per row.
    pub symbols: Vec<Symbol>,
    /// Drain the cursor fully before emitting anything.
    pub accumulate: bool,
    /// Maximum rows per response.
    pub batch_size: usize,
    /// Ship last-committed versions in the side channel.
    pub send_old: bool,
    /// Ship the transaction's own versions in the side channel.
    pub send_new: bool,
}

/// A remote-pull response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemotePullRes {
    /// The responding worker.
    pub worker_id: WorkerId,
    /// Cursor state after this pull.
    pub pull_state: PullState,
    /// Result rows, at most `batch_size` of them.
    pub frames: Vec<Vec<FrameValue>>,
    /// Version payloads for every vertex the frames reference.
    pub vertices: Vec<VertexPayload>,
    /// Version payloads for every edge the frames reference.
    pub edges: Vec<EdgePayload>,
}

impl RemotePullRes {
    /// An empty response in the given state.
    #[must_use]
    pub fn empty(worker_id: WorkerId, pull_state: PullState) -> Self {
        Self {
            worker_id,
            pull_state,
            frames: Vec::new(),
            vertices: Vec::new(),
            edges: Vec::new(),
        }
    }
}

/// Every request the control plane carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcRequest {
    /// Pull a batch from a plan fragment.
    RemotePull(RemotePullReq),
    /// The coordinator advanced a transaction's command counter.
    TransactionCommandAdvanced {
        /// The transaction.
        tx_id: TxId,
    },
    /// The coordinator published its oldest-active id; workers drop
    /// per-transaction state below it.
    OldestActive {
        /// The horizon.
        tx_id: TxId,
    },
}

/// Every response the control plane carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcResponse {
    /// Response to [`RpcRequest::RemotePull`].
    RemotePull(RemotePullRes),
    /// Ack for [`RpcRequest::TransactionCommandAdvanced`].
    TransactionCommandAdvanced,
    /// Ack for [`RpcRequest::OldestActive`].
    OldestActive,
    /// The server could not process the request.
    Failure {
        /// What went wrong.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use arachne_common::types::Gid;

    #[test]
    fn terminal_classification() {
        assert!(!PullState::CursorInProgress.is_terminal());
        assert!(PullState::CursorExhausted.is_terminal());
        assert!(!PullState::CursorExhausted.is_error());
        assert!(PullState::ReconstructionError.is_error());
    }

    #[test]
    fn error_mapping() {
        assert_eq!(
            PullState::from_error(&Error::Serialization),
            PullState::SerializationError
        );
        assert_eq!(
            PullState::from_error(&Error::AttachedVertex),
            PullState::UnableToDeleteVertexError
        );
        assert_eq!(
            PullState::from_error(&Error::Query("boom".into())),
            PullState::QueryError
        );
        assert_eq!(
            PullState::from_error(&Error::HintedAbort),
            PullState::HintedAbortError
        );
    }

    #[test]
    fn request_roundtrip() {
        let req = RpcRequest::RemotePull(RemotePullReq {
            tx_id: TxId(9),
            tx_snapshot: Snapshot::from_ids(vec![TxId(3)]),
            plan_id: 4,
            params: Parameters::new(),
            symbols: vec![Symbol::new("n", 0)],
            accumulate: true,
            batch_size: 16,
            send_old: true,
            send_new: true,
        });
        let bytes = bincode::serde::encode_to_vec(&req, bincode::config::standard()).unwrap();
        let (back, _): (RpcRequest, _) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        match back {
            RpcRequest::RemotePull(r) => {
                assert_eq!(r.tx_id, TxId(9));
                assert!(r.tx_snapshot.contains(TxId(3)));
                assert_eq!(r.batch_size, 16);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn response_roundtrip_with_frames() {
        let addr = GlobalAddress::new(WorkerId(1), Gid(5));
        let res = RpcResponse::RemotePull(RemotePullRes {
            worker_id: WorkerId(1),
            pull_state: PullState::CursorInProgress,
            frames: vec![vec![
                FrameValue::Vertex(addr),
                FrameValue::Value(Value::from(1i64)),
            ]],
            vertices: vec![VertexPayload {
                address: addr,
                old: Some(VertexRecord::new()),
                new: None,
            }],
            edges: Vec::new(),
        });
        let bytes = bincode::serde::encode_to_vec(&res, bincode::config::standard()).unwrap();
        let (back, _): (RpcResponse, _) =
            bincode::serde::decode_from_slice(&bytes, bincode::config::standard()).unwrap();
        match back {
            RpcResponse::RemotePull(r) => {
                assert_eq!(r.frames.len(), 1);
                assert_eq!(r.frames[0][0], FrameValue::Vertex(addr));
                assert_eq!(r.vertices.len(), 1);
            }
            _ => panic!("wrong variant"),
        }
    }
}
