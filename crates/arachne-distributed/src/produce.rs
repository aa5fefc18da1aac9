//! The worker side of remote pull: ongoing produces and their server.
//!
//! Per (transaction, plan) a worker keeps an [`OngoingProduce`]: the open
//! cursor, the evaluation frame, the pull symbols, the optional
//! accumulation buffer, and a sticky terminal state. The
//! [`ProduceServer`] owns the map of them, dispatches pull and
//! command-advanced requests, and drops entries once their transaction
//! falls below the published oldest-active horizon.

use std::collections::VecDeque;
use std::sync::Arc;

use arachne_common::types::{GlobalAddress, TxId};
use arachne_common::utils::error::Result;
use arachne_common::utils::hash::FxHashSet;
use arachne_core::record::{EdgeRecord, VertexRecord};
use arachne_engine::{Database, DatabaseAccessor};
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::cursor::{make_cursor, Cursor, ExecutionContext, Frame};
use crate::messages::{
    EdgePayload, FrameValue, PullState, RemotePullReq, RemotePullRes, VertexPayload,
};
use crate::plan::{Parameters, PlanConsumer, PlanId, Symbol};

/// Cursor state for one (transaction, plan) pair on a worker.
pub struct OngoingProduce {
    dba: DatabaseAccessor,
    cursor: Cursor,
    frame: Frame,
    params: Parameters,
    pull_symbols: Vec<Symbol>,
    accumulation: VecDeque<Vec<FrameValue>>,
    cursor_state: PullState,
}

impl OngoingProduce {
    /// Builds the produce for a request: registers the running
    /// transaction with the worker engine, looks the plan up, sizes the
    /// frame.
    ///
    /// # Errors
    ///
    /// Fails for unknown plans or transactions.
    pub fn new(db: &Database, consumer: &PlanConsumer, req: &RemotePullReq) -> Result<Self> {
        // On a worker, cache the shipped snapshot so no extra round trip
        // is needed; the coordinator already knows the transaction.
        let dba = if db.engine().worker().is_some() {
            db.access_running(req.tx_id, req.tx_snapshot.clone())?
        } else {
            db.access_existing(req.tx_id)?
        };
        let pack = consumer.plan_for(req.plan_id)?;
        let cursor = make_cursor(&pack.plan);
        let frame = Frame::new(pack.symbol_table.max_position());
        Ok(Self {
            dba,
            cursor,
            frame,
            params: req.params.clone(),
            pull_symbols: req.symbols.clone(),
            accumulation: VecDeque::new(),
            cursor_state: PullState::CursorInProgress,
        })
    }

    /// The produce's transactional accessor.
    #[must_use]
    pub fn dba(&self) -> &DatabaseAccessor {
        &self.dba
    }

    /// Drains the cursor into the accumulation buffer, returning the
    /// terminal state that stopped it.
    pub fn accumulate(&mut self) -> PullState {
        loop {
            let (row, state) = self.pull_one_from_cursor();
            if state != PullState::CursorInProgress {
                return state;
            }
            self.accumulation.push_back(row);
        }
    }

    /// Produces the next row: from the accumulation buffer (with
    /// reconstruction) when one exists, from the cursor otherwise.
    ///
    /// Error states are sticky - once entered, every later pull returns
    /// the same state without advancing.
    pub fn pull(&mut self) -> (Vec<FrameValue>, PullState) {
        if self.cursor_state.is_error() {
            return (Vec::new(), self.cursor_state);
        }
        if let Some(row) = self.accumulation.pop_front() {
            for element in &row {
                if let Err(_e) = self.reconstruct(element) {
                    self.cursor_state = PullState::ReconstructionError;
                    return (row, self.cursor_state);
                }
            }
            return (row, PullState::CursorInProgress);
        }
        self.pull_one_from_cursor()
    }

    /// Re-resolves one buffered element in the current transactional
    /// view.
    fn reconstruct(&self, element: &FrameValue) -> Result<()> {
        match element {
            FrameValue::Value(_) => Ok(()),
            FrameValue::Vertex(address) => self.dba.vertex(*address).reconstruct(),
            FrameValue::Edge(address) => self.dba.edge(*address).reconstruct(),
            FrameValue::Path { vertices, edges } => {
                for address in vertices {
                    self.dba.vertex(*address).reconstruct()?;
                }
                for address in edges {
                    self.dba.edge(*address).reconstruct()?;
                }
                Ok(())
            }
        }
    }

    /// One pull straight from the cursor. Terminal states are sticky:
    /// accumulation may already have exhausted the cursor before normal
    /// pulls begin.
    fn pull_one_from_cursor(&mut self) -> (Vec<FrameValue>, PullState) {
        if self.cursor_state != PullState::CursorInProgress {
            return (Vec::new(), self.cursor_state);
        }
        let ctx = ExecutionContext {
            dba: &self.dba,
            params: &self.params,
        };
        match self.cursor.pull(&mut self.frame, &ctx) {
            Ok(true) => {
                let row = self
                    .pull_symbols
                    .iter()
                    .map(|s| self.frame.get(s.position).clone())
                    .collect();
                (row, PullState::CursorInProgress)
            }
            Ok(false) => {
                self.cursor_state = PullState::CursorExhausted;
                (Vec::new(), self.cursor_state)
            }
            Err(e) => {
                self.cursor_state = PullState::from_error(&e);
                (Vec::new(), self.cursor_state)
            }
        }
    }
}

/// The worker-side pull dispatcher.
pub struct ProduceServer {
    db: Arc<Database>,
    consumer: Arc<PlanConsumer>,
    ongoing: DashMap<(TxId, PlanId), Arc<Mutex<OngoingProduce>>>,
}

impl ProduceServer {
    /// Creates a server over a database and its plan cache.
    #[must_use]
    pub fn new(db: Arc<Database>, consumer: Arc<PlanConsumer>) -> Self {
        Self {
            db,
            consumer,
            ongoing: DashMap::new(),
        }
    }

    /// The plan cache.
    #[must_use]
    pub fn consumer(&self) -> &Arc<PlanConsumer> {
        &self.consumer
    }

    /// The database.
    #[must_use]
    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    fn get_ongoing(&self, req: &RemotePullReq) -> Result<Arc<Mutex<OngoingProduce>>> {
        if let Some(existing) = self.ongoing.get(&(req.tx_id, req.plan_id)) {
            return Ok(existing.value().clone());
        }
        let produce = Arc::new(Mutex::new(OngoingProduce::new(
            &self.db,
            &self.consumer,
            req,
        )?));
        Ok(self
            .ongoing
            .entry((req.tx_id, req.plan_id))
            .or_insert(produce)
            .value()
            .clone())
    }

    /// Serves one remote-pull request.
    ///
    /// Pulls for the same (transaction, plan) serialize on the produce's
    /// mutex in arrival order. Any terminal state is returned as-is;
    /// frames are only attached for in-progress rows.
    pub fn remote_pull(&self, req: &RemotePullReq) -> RemotePullRes {
        let worker_id = self.db.worker_id();
        let produce = match self.get_ongoing(req) {
            Ok(produce) => produce,
            Err(e) => {
                tracing::warn!("remote pull setup failed: {e}");
                return RemotePullRes::empty(worker_id, PullState::from_error(&e));
            }
        };
        let mut produce = produce.lock();

        let mut res = RemotePullRes::empty(worker_id, PullState::CursorInProgress);
        if req.accumulate {
            res.pull_state = produce.accumulate();
            if res.pull_state != PullState::CursorExhausted {
                return res;
            }
        }

        let mut shipped: FxHashSet<GlobalAddress> = FxHashSet::default();
        for _ in 0..req.batch_size {
            let (row, state) = produce.pull();
            res.pull_state = state;
            if state != PullState::CursorInProgress {
                break;
            }
            self.collect_payloads(&mut res, &row, req, produce.dba(), &mut shipped);
            res.frames.push(row);
        }
        res
    }

    /// Fills the response side channel for one row's referenced entities.
    fn collect_payloads(
        &self,
        res: &mut RemotePullRes,
        row: &[FrameValue],
        req: &RemotePullReq,
        dba: &DatabaseAccessor,
        shipped: &mut FxHashSet<GlobalAddress>,
    ) {
        let mut vertices: Vec<GlobalAddress> = Vec::new();
        let mut edges: Vec<GlobalAddress> = Vec::new();
        for element in row {
            match element {
                FrameValue::Value(_) => {}
                FrameValue::Vertex(address) => vertices.push(*address),
                FrameValue::Edge(address) => edges.push(*address),
                FrameValue::Path {
                    vertices: vs,
                    edges: es,
                } => {
                    vertices.extend_from_slice(vs);
                    edges.extend_from_slice(es);
                }
            }
        }

        let store = dba.store();
        for address in vertices {
            if !address.is_local_to(store.worker_id()) || !shipped.insert(address) {
                continue;
            }
            let (old, new) = store.vertex_pair(&dba.view(), address.gid);
            res.vertices.push(VertexPayload {
                address,
                old: old.filter(|_| req.send_old).map(|r| resolve_vertex(store, r)),
                new: new.filter(|_| req.send_new).map(|r| resolve_vertex(store, r)),
            });
        }
        for address in edges {
            if !address.is_local_to(store.worker_id()) || !shipped.insert(address) {
                continue;
            }
            let (old, new) = store.edge_pair(&dba.view(), address.gid);
            res.edges.push(EdgePayload {
                address,
                old: old.filter(|_| req.send_old).map(|r| resolve_edge(store, r)),
                new: new.filter(|_| req.send_new).map(|r| resolve_edge(store, r)),
            });
        }
    }

    /// Handles the command-advanced notification: bump the local command
    /// mirror and drop the transaction's remote-record cache.
    pub fn transaction_command_advanced(&self, tx_id: TxId) {
        if let Some(worker) = self.db.engine().worker() {
            if let Err(e) = worker.update_command(tx_id) {
                tracing::debug!("command advance for unknown transaction {tx_id}: {e}");
            }
        } else if let Some(tx) = self.db.engine().engine().transaction(tx_id) {
            let _ = self.db.engine().engine().advance(&tx);
        }
        self.db.remote().clear_transaction(tx_id);
    }

    /// Handles the oldest-active publication: drop ongoing produces,
    /// transaction mirrors and remote caches strictly below the horizon.
    pub fn clear_transactional_cache(&self, oldest_active: TxId) {
        self.ongoing.retain(|(tx, _), _| *tx >= oldest_active);
        if let Some(worker) = self.db.engine().worker() {
            worker.clear_transactional_cache(oldest_active);
        }
        self.db.remote().clear_below(oldest_active);
    }

    /// Number of cached ongoing produces (for tests and introspection).
    #[must_use]
    pub fn ongoing_count(&self) -> usize {
        self.ongoing.len()
    }
}

/// Inlines vaulted property slots so records survive the wire.
fn resolve_vertex(store: &arachne_core::GraphStore, mut record: VertexRecord) -> VertexRecord {
    if let Ok(resolved) = store.resolve_properties(&record.properties) {
        record.properties = resolved;
    }
    record
}

/// Inlines vaulted property slots so records survive the wire.
fn resolve_edge(store: &arachne_core::GraphStore, mut record: EdgeRecord) -> EdgeRecord {
    if let Ok(resolved) = store.resolve_properties(&record.properties) {
        record.properties = resolved;
    }
    record
}
