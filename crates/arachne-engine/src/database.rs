//! The database context and its transactional accessor.
//!
//! [`Database`] owns the global state: the graph store, the transaction
//! engine (coordinator or worker flavor), the remote-record cache, the
//! WAL, and the maintenance threads (WAL flusher, snapshot cadence,
//! storage GC). A [`DatabaseAccessor`] binds all of that to one
//! transaction and is what query execution actually touches.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arachne_common::mvcc::{ChainView, TxStatus};
use arachne_common::types::{CommandId, GlobalAddress, Snapshot, TxId, WorkerId};
use arachne_common::utils::error::{Error, Result};
use arachne_common::utils::hash::FxHashSet;
use arachne_core::remote::RemoteDataManager;
use arachne_core::store::VertexFilter;
use arachne_core::vault::PropertyVault;
use arachne_core::GraphStore;
use arcstr::ArcStr;
use parking_lot::Mutex;

use crate::accessor::{EdgeAccessor, VertexAccessor};
use crate::config::Config;
use crate::durability::snapshot::{collect_body, write_snapshot};
use crate::durability::wal::{WalEntry, WalManager, WalOp};
use crate::durability::{recover, RecoveryInfo};
use crate::maintenance::PeriodicTask;
use crate::transaction::{Engine, Transaction, WorkerEngine};

/// Cadence of the background WAL flusher in asynchronous-commit mode.
const WAL_FLUSH_INTERVAL: Duration = Duration::from_millis(100);

/// Coordinator or worker transaction engine.
#[derive(Debug)]
pub enum EngineKind {
    /// The coordinator's engine: starts transactions itself.
    Coordinator(Engine),
    /// A worker's engine: mirrors coordinator transactions too.
    Worker(WorkerEngine),
}

impl EngineKind {
    /// The underlying engine, whichever flavor.
    #[must_use]
    pub fn engine(&self) -> &Engine {
        match self {
            EngineKind::Coordinator(engine) => engine,
            EngineKind::Worker(worker) => worker.local(),
        }
    }

    /// The worker engine, when this node is one.
    #[must_use]
    pub fn worker(&self) -> Option<&WorkerEngine> {
        match self {
            EngineKind::Coordinator(_) => None,
            EngineKind::Worker(worker) => Some(worker),
        }
    }
}

impl TxStatus for EngineKind {
    fn is_committed(&self, id: TxId) -> bool {
        self.engine().is_committed(id)
    }

    fn is_aborted(&self, id: TxId) -> bool {
        self.engine().is_aborted(id)
    }
}

/// A graph database instance - one per process, coordinator or worker.
pub struct Database {
    config: Config,
    store: Arc<GraphStore>,
    engine: Arc<EngineKind>,
    remote: Arc<RemoteDataManager>,
    wal: Option<Arc<WalManager>>,
    recovery_info: Option<RecoveryInfo>,
    maintenance: Mutex<Vec<PeriodicTask>>,
    closed: AtomicBool,
}

impl Database {
    /// Creates a database from a configuration, running recovery when
    /// asked to.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or when recover-on-startup cannot
    /// read the durability directory.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let vault = if config.properties_on_disk.is_empty() {
            None
        } else {
            Some(PropertyVault::open(
                config.durability_directory.join("properties.vault"),
            )?)
        };
        let vault_names: FxHashSet<ArcStr> = config
            .properties_on_disk
            .iter()
            .map(|s| ArcStr::from(s.as_str()))
            .collect();

        let store = Arc::new(GraphStore::with_vault(
            config.worker_id,
            vault,
            vault_names,
        ));
        let engine = Arc::new(if config.worker_id == WorkerId::COORDINATOR {
            EngineKind::Coordinator(Engine::new())
        } else {
            EngineKind::Worker(WorkerEngine::new())
        });

        let mut recovery_info = None;
        let wal = if config.durability_enabled {
            std::fs::create_dir_all(&config.durability_directory)?;
            if config.db_recover_on_startup {
                let info = recover(&store, engine.engine(), &config.durability_directory)?;
                tracing::info!(
                    "recovery applied {} wal records (snapshot cutoff {:?})",
                    info.wal_records_applied,
                    info.snapshot_cutoff
                );
                recovery_info = Some(info);
            }
            Some(Arc::new(WalManager::open(&config.durability_directory)?))
        } else {
            None
        };

        let db = Self {
            config,
            store,
            engine,
            remote: Arc::new(RemoteDataManager::new()),
            wal,
            recovery_info,
            maintenance: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        };
        db.spawn_maintenance();
        Ok(db)
    }

    /// A throwaway in-memory database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Config::in_memory()).expect("in-memory database creation should not fail")
    }

    fn spawn_maintenance(&self) {
        let mut tasks = self.maintenance.lock();

        if let Some(wal) = &self.wal {
            if !self.config.synchronous_commit {
                let wal = Arc::clone(wal);
                tasks.push(PeriodicTask::spawn(
                    "arachne-wal-flusher",
                    WAL_FLUSH_INTERVAL,
                    true,
                    move || {
                        if let Err(e) = wal.sync() {
                            tracing::warn!("wal flush failed: {e}");
                        }
                    },
                ));
            }
        }

        if self.config.gc_cycle_sec > 0 {
            let store = Arc::clone(&self.store);
            let engine = Arc::clone(&self.engine);
            let mut last_generation = u64::MAX;
            tasks.push(PeriodicTask::spawn(
                "arachne-storage-gc",
                Duration::from_secs(self.config.gc_cycle_sec as u64),
                false,
                move || {
                    let generation = engine.engine().generation();
                    if generation == last_generation {
                        return;
                    }
                    last_generation = generation;
                    let horizon = engine.engine().gc_horizon();
                    store.gc(horizon, engine.as_ref());
                },
            ));
        }

        if self.config.durability_enabled && self.config.snapshot_cycle_sec > 0 {
            let store = Arc::clone(&self.store);
            let engine = Arc::clone(&self.engine);
            let dir = self.config.durability_directory.clone();
            let worker = self.config.worker_id;
            let retained = self.config.snapshot_max_retained;
            tasks.push(PeriodicTask::spawn(
                "arachne-snapshooter",
                Duration::from_secs(self.config.snapshot_cycle_sec as u64),
                false,
                move || {
                    if let Err(e) = snapshot_pass(&store, &engine, &dir, worker, retained) {
                        tracing::warn!("periodic snapshot failed: {e}");
                    }
                },
            ));
        }
    }

    /// The configuration this database runs with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The graph store.
    #[must_use]
    pub fn store(&self) -> &Arc<GraphStore> {
        &self.store
    }

    /// The transaction engine.
    #[must_use]
    pub fn engine(&self) -> &Arc<EngineKind> {
        &self.engine
    }

    /// The remote-record cache.
    #[must_use]
    pub fn remote(&self) -> &Arc<RemoteDataManager> {
        &self.remote
    }

    /// This node's worker id.
    #[must_use]
    pub fn worker_id(&self) -> WorkerId {
        self.config.worker_id
    }

    /// What recovery did at startup, if it ran.
    #[must_use]
    pub fn recovery_info(&self) -> Option<RecoveryInfo> {
        self.recovery_info
    }

    /// Begins a transaction and binds an accessor to it. The configured
    /// query deadline applies.
    ///
    /// # Errors
    ///
    /// Fails when the begin record cannot be appended to the WAL.
    pub fn access(&self) -> Result<DatabaseAccessor> {
        let timeout = (self.config.query_execution_time_sec > 0)
            .then(|| Duration::from_secs(self.config.query_execution_time_sec as u64));
        let tx = self.engine.engine().begin_with_deadline(timeout);
        let dba = self.bind(tx);
        dba.log(WalOp::Begin)?;
        Ok(dba)
    }

    /// Binds an accessor to a coordinator-started transaction, mirroring
    /// it into this worker's engine first. Idempotent per transaction.
    ///
    /// # Errors
    ///
    /// Fails when called on a coordinator.
    pub fn access_running(&self, id: TxId, snapshot: Snapshot) -> Result<DatabaseAccessor> {
        let worker = self
            .engine
            .worker()
            .ok_or_else(|| Error::Query("running transactions require a worker node".into()))?;
        let tx = worker.running_transaction(id, snapshot);
        Ok(self.bind(tx))
    }

    /// Binds an accessor to a transaction this node already knows about.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnknownTransaction`] when the id is not live
    /// here.
    pub fn access_existing(&self, id: TxId) -> Result<DatabaseAccessor> {
        let tx = self
            .engine
            .engine()
            .transaction(id)
            .ok_or(Error::UnknownTransaction(id))?;
        Ok(self.bind(tx))
    }

    fn bind(&self, tx: Arc<Transaction>) -> DatabaseAccessor {
        DatabaseAccessor {
            store: Arc::clone(&self.store),
            engine: Arc::clone(&self.engine),
            remote: Arc::clone(&self.remote),
            wal: self.wal.clone(),
            synchronous_commit: self.config.synchronous_commit,
            tx,
        }
    }

    /// Takes a snapshot right now, against a fresh read-only transaction.
    ///
    /// # Errors
    ///
    /// Fails when durability is disabled or the write fails.
    pub fn snapshot_now(&self) -> Result<PathBuf> {
        if !self.config.durability_enabled {
            return Err(Error::Durability("durability is disabled".into()));
        }
        snapshot_pass(
            &self.store,
            &self.engine,
            &self.config.durability_directory,
            self.config.worker_id,
            self.config.snapshot_max_retained,
        )
    }

    /// Stops maintenance, optionally takes the exit snapshot, and syncs
    /// the WAL. Idempotent; also runs on drop.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.maintenance.lock().clear();
        if self.config.durability_enabled && self.config.snapshot_on_exit {
            if let Err(e) = self.snapshot_now() {
                tracing::warn!("snapshot on exit failed: {e}");
            }
        }
        if let Some(wal) = &self.wal {
            if let Err(e) = wal.sync() {
                tracing::warn!("final wal sync failed: {e}");
            }
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.close();
    }
}

/// One snapshot: begin a read-only transaction, dump what it sees, write
/// the file, release the transaction.
fn snapshot_pass(
    store: &GraphStore,
    engine: &EngineKind,
    dir: &std::path::Path,
    worker: WorkerId,
    retained: i64,
) -> Result<PathBuf> {
    let tx = engine.engine().begin();
    let view = ChainView::new(tx.id(), tx.command(), tx.snapshot(), engine);
    let result = collect_body(store, &view)
        .and_then(|body| write_snapshot(dir, worker, tx.id(), &body, retained));
    engine.engine().abort(&tx)?;
    result
}

/// A transactional handle onto the database.
///
/// Cheap to clone; owns shared handles to the global state plus the
/// transaction it acts for. All graph reads and writes flow through one
/// of these.
#[derive(Clone)]
pub struct DatabaseAccessor {
    store: Arc<GraphStore>,
    engine: Arc<EngineKind>,
    remote: Arc<RemoteDataManager>,
    wal: Option<Arc<WalManager>>,
    synchronous_commit: bool,
    tx: Arc<Transaction>,
}

impl DatabaseAccessor {
    /// The bound transaction.
    #[must_use]
    pub fn transaction(&self) -> &Arc<Transaction> {
        &self.tx
    }

    /// The bound transaction's id.
    #[must_use]
    pub fn tx_id(&self) -> TxId {
        self.tx.id()
    }

    /// The graph store.
    #[must_use]
    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// The remote-record cache.
    #[must_use]
    pub fn remote(&self) -> &RemoteDataManager {
        &self.remote
    }

    /// This node's worker id.
    #[must_use]
    pub fn worker_id(&self) -> WorkerId {
        self.store.worker_id()
    }

    /// The MVCC view for the transaction's current command.
    #[must_use]
    pub fn view(&self) -> ChainView<'_> {
        ChainView::new(
            self.tx.id(),
            self.tx.command(),
            self.tx.snapshot(),
            self.engine.as_ref(),
        )
    }

    /// Appends a WAL record stamped with this transaction, when the WAL
    /// is on.
    pub(crate) fn log(&self, op: WalOp) -> Result<()> {
        if let Some(wal) = &self.wal {
            wal.append(&WalEntry {
                tx: self.tx.id(),
                cmd: self.tx.command(),
                op,
            })?;
        }
        Ok(())
    }

    /// Surfaces [`Error::HintedAbort`] when the transaction was told to
    /// stop. Cursors call this at every pull boundary.
    pub fn check_abort(&self) -> Result<()> {
        if self.tx.should_abort() {
            Err(Error::HintedAbort)
        } else {
            Ok(())
        }
    }

    // === Interning passthroughs ===

    /// Interns a label name.
    #[must_use]
    pub fn label(&self, name: &str) -> arachne_common::types::LabelId {
        self.store.catalogs().label(name)
    }

    /// Interns an edge-type name.
    #[must_use]
    pub fn edge_type(&self, name: &str) -> arachne_common::types::EdgeTypeId {
        self.store.catalogs().edge_type(name)
    }

    /// Interns a property name.
    #[must_use]
    pub fn property(&self, name: &str) -> arachne_common::types::PropertyId {
        self.store.catalogs().property(name)
    }

    /// Resolves a label id to its name.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnknownIdentifier`] for unassigned ids.
    pub fn label_name(&self, id: arachne_common::types::LabelId) -> Result<ArcStr> {
        self.store.catalogs().label_name(id)
    }

    /// Resolves an edge-type id to its name.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnknownIdentifier`] for unassigned ids.
    pub fn edge_type_name(&self, id: arachne_common::types::EdgeTypeId) -> Result<ArcStr> {
        self.store.catalogs().edge_type_name(id)
    }

    /// Resolves a property id to its name.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::UnknownIdentifier`] for unassigned ids.
    pub fn property_name(&self, id: arachne_common::types::PropertyId) -> Result<ArcStr> {
        self.store.catalogs().property_name(id)
    }

    // === Entity lifecycle ===

    /// Creates a vertex.
    ///
    /// # Errors
    ///
    /// Fails when the WAL append fails.
    pub fn create_vertex(&self) -> Result<VertexAccessor<'_>> {
        let gid = self.store.create_vertex(&self.view());
        self.log(WalOp::CreateVertex { gid })?;
        Ok(VertexAccessor::new(self.store.address(gid), self))
    }

    /// Binds an accessor to an existing vertex address. Does not check
    /// visibility - reads through the accessor do.
    #[must_use]
    pub fn vertex(&self, address: GlobalAddress) -> VertexAccessor<'_> {
        VertexAccessor::new(address, self)
    }

    /// Binds an accessor to an existing edge address.
    #[must_use]
    pub fn edge(&self, address: GlobalAddress) -> EdgeAccessor<'_> {
        EdgeAccessor::new(address, self)
    }

    /// Creates an edge between two local vertices.
    ///
    /// # Errors
    ///
    /// Propagates store conflicts; fails with [`Error::Query`] for
    /// non-local endpoints.
    pub fn create_edge(
        &self,
        from: &VertexAccessor<'_>,
        to: &VertexAccessor<'_>,
        edge_type: &str,
    ) -> Result<EdgeAccessor<'_>> {
        let type_id = self.edge_type(edge_type);
        let gid = self
            .store
            .create_edge(&self.view(), from.address(), to.address(), type_id)?;
        self.log(WalOp::CreateEdge {
            gid,
            from: from.address(),
            to: to.address(),
            edge_type: type_id,
            type_name: ArcStr::from(edge_type),
        })?;
        Ok(EdgeAccessor::new(self.store.address(gid), self))
    }

    /// Deletes a vertex; with `detach`, incident edges go first.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::AttachedVertex`] when edges remain and
    /// `detach` is false.
    pub fn delete_vertex(&self, vertex: &VertexAccessor<'_>, detach: bool) -> Result<()> {
        let gid = vertex.address().gid;
        let removed_edges = self.store.delete_vertex(&self.view(), gid, detach)?;
        for edge in removed_edges {
            self.log(WalOp::DeleteEdge { gid: edge })?;
        }
        self.log(WalOp::DeleteVertex { gid })?;
        Ok(())
    }

    /// Deletes an edge.
    ///
    /// # Errors
    ///
    /// Propagates store conflicts.
    pub fn delete_edge(&self, edge: &EdgeAccessor<'_>) -> Result<()> {
        let gid = edge.address().gid;
        self.store.delete_edge(&self.view(), gid)?;
        self.log(WalOp::DeleteEdge { gid })?;
        Ok(())
    }

    // === Scans ===

    /// Visible vertices matching the filter, as accessors.
    ///
    /// # Errors
    ///
    /// Propagates store errors (vault reads).
    pub fn vertices(&self, filter: &VertexFilter) -> Result<Vec<VertexAccessor<'_>>> {
        Ok(self
            .store
            .vertices(&self.view(), filter)?
            .into_iter()
            .map(|gid| VertexAccessor::new(self.store.address(gid), self))
            .collect())
    }

    /// Visible edges, as accessors.
    #[must_use]
    pub fn edges(&self) -> Vec<EdgeAccessor<'_>> {
        self.store
            .edges(&self.view())
            .into_iter()
            .map(|gid| EdgeAccessor::new(self.store.address(gid), self))
            .collect()
    }

    /// Number of vertices visible to this transaction.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.store.vertex_count(&self.view())
    }

    /// Number of edges visible to this transaction.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.store.edge_count(&self.view())
    }

    // === Indexes ===

    /// Builds an index on a label, or on (label, property). Returns
    /// `Ok(false)` when it already exists.
    ///
    /// # Errors
    ///
    /// Propagates store and WAL errors.
    pub fn build_index(&self, label: &str, property: Option<&str>) -> Result<bool> {
        let label_id = self.label(label);
        let property_id = property.map(|p| self.property(p));
        let created = self
            .store
            .build_index(&self.view(), label_id, property_id)?;
        if created {
            self.log(WalOp::BuildIndex {
                label: label_id,
                label_name: ArcStr::from(label),
                property: property
                    .zip(property_id)
                    .map(|(name, id)| (id, ArcStr::from(name))),
            })?;
        }
        Ok(created)
    }

    // === Transaction control ===

    /// Advances the command counter, separating statement effects, and
    /// drops this transaction's remote cache so later reads refetch.
    ///
    /// # Errors
    ///
    /// Fails when the transaction is already terminal.
    pub fn advance_command(&self) -> Result<CommandId> {
        let cmd = self.engine.engine().advance(&self.tx)?;
        self.remote.clear_transaction(self.tx.id());
        Ok(cmd)
    }

    /// Commits the transaction. The commit record is the transaction's
    /// last WAL record; in synchronous-commit mode it is fsync'd before
    /// this returns.
    ///
    /// # Errors
    ///
    /// A WAL failure aborts the transaction and surfaces as
    /// [`Error::Durability`].
    pub fn commit(self) -> Result<()> {
        let wal_result = self.log(WalOp::Commit).and_then(|()| {
            if self.synchronous_commit {
                if let Some(wal) = &self.wal {
                    wal.sync()?;
                }
            }
            Ok(())
        });
        if let Err(e) = wal_result {
            let _ = self.engine.engine().abort(&self.tx);
            self.remote.clear_transaction(self.tx.id());
            return Err(e);
        }
        self.engine.engine().commit(&self.tx)?;
        self.remote.clear_transaction(self.tx.id());
        Ok(())
    }

    /// Aborts the transaction.
    ///
    /// # Errors
    ///
    /// Fails when the transaction is already terminal.
    pub fn abort(self) -> Result<()> {
        let _ = self.log(WalOp::Abort);
        self.engine.engine().abort(&self.tx)?;
        self.remote.clear_transaction(self.tx.id());
        Ok(())
    }

    /// Publishes the oldest-active id for cache cleanup decisions.
    #[must_use]
    pub fn oldest_active(&self) -> Option<TxId> {
        self.engine.engine().oldest_active()
    }
}
