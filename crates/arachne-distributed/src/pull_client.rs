//! Coordinator-side pull clients.
//!
//! One [`ClientPool`] per registered worker. `remote_pull` ships a batch
//! request, lands the returned vertex/edge version pairs in the
//! transaction's remote-record cache, and hands the frames (which
//! reference those entities by address) back to the caller.
//! Command-advance and oldest-active notifications fan out to every
//! worker.

use arachne_common::types::{TxId, WorkerId};
use arachne_common::utils::error::{Error, Result};
use arachne_engine::DatabaseAccessor;
use dashmap::DashMap;
use std::sync::Arc;

use crate::messages::{
    FrameValue, PullState, RemotePullReq, RpcRequest, RpcResponse,
};
use crate::plan::{Parameters, PlanId, Symbol};
use crate::rpc::ClientPool;

/// What one remote pull brought back, after cache insertion.
#[derive(Debug)]
pub struct RemotePullData {
    /// Cursor state on the worker.
    pub pull_state: PullState,
    /// The batch's frames; entity references resolve through the
    /// remote-record cache.
    pub frames: Vec<Vec<FrameValue>>,
}

/// Clients for driving plan fragments on workers.
#[derive(Default)]
pub struct PullRpcClients {
    pools: DashMap<WorkerId, Arc<ClientPool>>,
}

impl PullRpcClients {
    /// Creates an empty client set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a worker's RPC address.
    pub fn register_worker(&self, worker_id: WorkerId, addr: impl Into<String>) {
        self.pools.insert(worker_id, Arc::new(ClientPool::new(addr)));
    }

    /// Registered workers.
    #[must_use]
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        self.pools.iter().map(|e| *e.key()).collect()
    }

    fn pool(&self, worker_id: WorkerId) -> Result<Arc<ClientPool>> {
        self.pools
            .get(&worker_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::Query(format!("unknown worker {worker_id}")))
    }

    /// Pulls one batch of a plan fragment from a worker on behalf of the
    /// accessor's transaction.
    ///
    /// Returned vertex/edge payloads are inserted into the transaction's
    /// remote cache before the frames are handed back, so frame
    /// references resolve immediately.
    ///
    /// # Errors
    ///
    /// Fails on transport errors or an unknown worker; cursor-side
    /// failures come back as the pull state instead.
    #[allow(clippy::too_many_arguments)]
    pub fn remote_pull(
        &self,
        dba: &DatabaseAccessor,
        worker_id: WorkerId,
        plan_id: PlanId,
        params: &Parameters,
        symbols: &[Symbol],
        accumulate: bool,
        batch_size: usize,
    ) -> Result<RemotePullData> {
        let req = RemotePullReq {
            tx_id: dba.tx_id(),
            tx_snapshot: dba.transaction().snapshot().clone(),
            plan_id,
            params: params.clone(),
            symbols: symbols.to_vec(),
            accumulate,
            batch_size,
            send_old: true,
            send_new: true,
        };
        let response = self
            .pool(worker_id)?
            .with(|client| client.call(&RpcRequest::RemotePull(req.clone())))?;
        let res = match response {
            RpcResponse::RemotePull(res) => res,
            RpcResponse::Failure { message } => return Err(Error::RpcDecode(message)),
            _ => return Err(Error::RpcDecode("unexpected response variant".into())),
        };

        let tx = dba.tx_id();
        for payload in res.vertices {
            dba.remote()
                .insert_vertex(tx, payload.address.gid, payload.old, payload.new);
        }
        for payload in res.edges {
            dba.remote()
                .insert_edge(tx, payload.address.gid, payload.old, payload.new);
        }

        Ok(RemotePullData {
            pull_state: res.pull_state,
            frames: res.frames,
        })
    }

    /// Tells every worker the transaction's command counter advanced.
    ///
    /// # Errors
    ///
    /// Fails on the first worker that cannot be reached.
    pub fn notify_command_advanced(&self, tx_id: TxId) -> Result<()> {
        self.broadcast(&RpcRequest::TransactionCommandAdvanced { tx_id })
    }

    /// Publishes the coordinator's oldest-active id so workers can drop
    /// stale per-transaction state.
    ///
    /// # Errors
    ///
    /// Fails on the first worker that cannot be reached.
    pub fn publish_oldest_active(&self, tx_id: TxId) -> Result<()> {
        self.broadcast(&RpcRequest::OldestActive { tx_id })
    }

    fn broadcast(&self, request: &RpcRequest) -> Result<()> {
        for entry in self.pools.iter() {
            let response = entry.value().with(|client| client.call(request))?;
            if let RpcResponse::Failure { message } = response {
                return Err(Error::RpcDecode(message));
            }
        }
        Ok(())
    }
}
