//! Startup recovery: newest intact snapshot plus committed WAL suffix.
//!
//! The newest checksum-valid snapshot is loaded (stepping backward past
//! corrupt ones), then WAL records are replayed - but only records of
//! transactions that committed, and only those whose transaction id lies
//! above the snapshot's cutoff. The torn or corrupt WAL tail is truncated
//! away. Finally the engine's id allocation resumes strictly above
//! everything seen.

use std::path::Path;

use arachne_common::mvcc::ChainView;
use arachne_common::types::{CommandId, Snapshot, TxId};
use arachne_common::utils::error::Result;
use arachne_common::utils::hash::FxHashSet;
use arachne_core::record::PropertyEntry;
use arachne_core::{EdgeEntry, EdgeRecord, GraphStore, VertexRecord};

use super::snapshot::{list_snapshots, load_body, read_snapshot};
use super::wal::{read_wal, truncate_wal, WalOp, WalOwner, WAL_FILE};
use crate::transaction::Engine;

/// What recovery found and applied.
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryInfo {
    /// Cutoff of the snapshot that was loaded, if any.
    pub snapshot_cutoff: Option<TxId>,
    /// Number of WAL records applied.
    pub wal_records_applied: usize,
    /// Highest transaction id seen anywhere.
    pub max_tx: TxId,
}

/// Recovers `store` from the durability directory and repositions the
/// engine's id allocation.
///
/// # Errors
///
/// Fails with a durability error when replaying a committed record does
/// not apply cleanly; unreadable snapshots are skipped with a warning
/// instead.
pub fn recover(store: &GraphStore, engine: &Engine, dir: impl AsRef<Path>) -> Result<RecoveryInfo> {
    let dir = dir.as_ref();
    let mut info = RecoveryInfo::default();

    let empty = Snapshot::empty();
    let view = ChainView::new(TxId(u64::MAX), CommandId(u64::MAX), &empty, engine);

    // Newest intact snapshot wins; corrupt ones are stepped past.
    for (cutoff, path) in list_snapshots(dir)?.into_iter().rev() {
        match read_snapshot(&path) {
            Ok((read_cutoff, body)) => {
                debug_assert_eq!(read_cutoff, cutoff);
                load_body(store, &view, &body)?;
                info.snapshot_cutoff = Some(read_cutoff);
                info.max_tx = info.max_tx.max(read_cutoff);
                tracing::info!(
                    "recovered snapshot {} ({} vertices, {} edges)",
                    path.display(),
                    body.vertices.len(),
                    body.edges.len()
                );
                break;
            }
            Err(e) => {
                tracing::warn!("skipping snapshot {}: {e}", path.display());
            }
        }
    }

    let wal_path = dir.join(WAL_FILE);
    let contents = read_wal(&wal_path)?;
    if wal_path.exists() {
        let file_len = std::fs::metadata(&wal_path)?.len();
        if file_len > contents.valid_len {
            tracing::warn!(
                "truncating wal from {file_len} to {} bytes",
                contents.valid_len
            );
            truncate_wal(&wal_path, contents.valid_len)?;
        }
    }

    let committed: FxHashSet<TxId> = contents
        .entries
        .iter()
        .filter(|e| matches!(e.op, WalOp::Commit))
        .map(|e| e.tx)
        .collect();
    let cutoff = info.snapshot_cutoff.unwrap_or(TxId::PRE_HISTORY);

    let mut deferred_indexes = Vec::new();
    for entry in &contents.entries {
        info.max_tx = info.max_tx.max(entry.tx);
        if entry.tx <= cutoff || !committed.contains(&entry.tx) {
            continue;
        }
        apply(store, &entry.op, &mut deferred_indexes)?;
        info.wal_records_applied += 1;
    }

    // Indexes declared in the replayed suffix are built over the final
    // recovered graph.
    for (label, property) in deferred_indexes {
        store.build_index(&view, label, property)?;
    }

    engine.ensure_next_above(info.max_tx);
    Ok(info)
}

fn apply(
    store: &GraphStore,
    op: &WalOp,
    deferred_indexes: &mut Vec<(
        arachne_common::types::LabelId,
        Option<arachne_common::types::PropertyId>,
    )>,
) -> Result<()> {
    let catalogs = store.catalogs();
    match op {
        WalOp::Begin | WalOp::Commit | WalOp::Abort => {}
        WalOp::CreateVertex { gid } => {
            store.install_vertex(*gid, VertexRecord::new());
        }
        WalOp::CreateEdge {
            gid,
            from,
            to,
            edge_type,
            type_name,
        } => {
            catalogs.edge_types().install(type_name, edge_type.0);
            store.install_edge(*gid, EdgeRecord::new(*edge_type, *from, *to));
            let out_entry = EdgeEntry {
                edge: store.address(*gid),
                peer: *to,
                edge_type: *edge_type,
            };
            store.replay_vertex_update(from.gid, |r| r.out_edges.push(out_entry))?;
            let in_entry = EdgeEntry {
                edge: store.address(*gid),
                peer: *from,
                edge_type: *edge_type,
            };
            store.replay_vertex_update(to.gid, |r| r.in_edges.push(in_entry))?;
        }
        WalOp::AddLabel { gid, label, name } => {
            catalogs.labels().install(name, label.0);
            store.replay_vertex_update(*gid, |r| {
                r.add_label(*label);
            })?;
        }
        WalOp::RemoveLabel { gid, label, name } => {
            catalogs.labels().install(name, label.0);
            store.replay_vertex_update(*gid, |r| {
                r.remove_label(*label);
            })?;
        }
        WalOp::SetProperty {
            owner,
            gid,
            property,
            name,
            value,
        } => {
            catalogs.properties().install(name, property.0);
            let entry = PropertyEntry::Inline(value.clone());
            match owner {
                WalOwner::Vertex => store.replay_vertex_update(*gid, |r| {
                    r.properties.set(*property, entry);
                })?,
                WalOwner::Edge => store.replay_edge_update(*gid, |r| {
                    r.properties.set(*property, entry);
                })?,
            }
        }
        WalOp::RemoveProperty {
            owner,
            gid,
            property,
            name,
        } => {
            catalogs.properties().install(name, property.0);
            match owner {
                WalOwner::Vertex => store.replay_vertex_update(*gid, |r| {
                    r.properties.remove(*property);
                })?,
                WalOwner::Edge => store.replay_edge_update(*gid, |r| {
                    r.properties.remove(*property);
                })?,
            }
        }
        WalOp::DeleteVertex { gid } => {
            store.replay_remove_vertex(*gid);
        }
        WalOp::DeleteEdge { gid } => {
            // Strip the edge from its endpoints' lists before dropping it.
            let endpoints = {
                let empty = Snapshot::empty();
                let status = PreHistoryOnly;
                let view = ChainView::new(TxId(u64::MAX), CommandId(u64::MAX), &empty, &status);
                store.edge(&view, *gid).map(|r| (r.from.gid, r.to.gid))
            };
            if let Some((from, to)) = endpoints {
                store.replay_vertex_update(from, |r| {
                    r.out_edges.retain(|e| e.edge.gid != *gid);
                    r.in_edges.retain(|e| e.edge.gid != *gid);
                })?;
                if to != from {
                    store.replay_vertex_update(to, |r| {
                        r.out_edges.retain(|e| e.edge.gid != *gid);
                        r.in_edges.retain(|e| e.edge.gid != *gid);
                    })?;
                }
            }
            store.replay_remove_edge(*gid);
        }
        WalOp::BuildIndex {
            label,
            label_name,
            property,
        } => {
            catalogs.labels().install(label_name, label.0);
            let property = property.as_ref().map(|(pid, name)| {
                catalogs.properties().install(name, pid.0);
                *pid
            });
            deferred_indexes.push((*label, property));
        }
    }
    Ok(())
}

/// During replay everything in the store is stamped pre-history; this
/// oracle is all a replay view needs.
struct PreHistoryOnly;

impl arachne_common::mvcc::TxStatus for PreHistoryOnly {
    fn is_committed(&self, id: TxId) -> bool {
        id == TxId::PRE_HISTORY
    }

    fn is_aborted(&self, _id: TxId) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::durability::wal::{WalEntry, WalManager};
    use arachne_common::types::{Gid, GlobalAddress, LabelId, PropertyId, Value, WorkerId};
    use arachne_core::store::VertexFilter;
    use arcstr::ArcStr;

    fn entry(tx: u64, op: WalOp) -> WalEntry {
        WalEntry {
            tx: TxId(tx),
            cmd: CommandId(1),
            op,
        }
    }

    fn reader_view<'a>(
        snap: &'a Snapshot,
        engine: &'a Engine,
    ) -> ChainView<'a> {
        ChainView::new(TxId(u64::MAX), CommandId(u64::MAX), snap, engine)
    }

    #[test]
    fn empty_directory_recovers_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = GraphStore::new(WorkerId(0));
        let engine = Engine::new();
        let info = recover(&store, &engine, dir.path()).unwrap();
        assert_eq!(info.snapshot_cutoff, None);
        assert_eq!(info.wal_records_applied, 0);
    }

    #[test]
    fn committed_suffix_is_applied() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WalManager::open(dir.path()).unwrap();
        // Tx 1 commits, tx 2 never does.
        wal.append(&entry(1, WalOp::Begin)).unwrap();
        wal.append(&entry(1, WalOp::CreateVertex { gid: Gid(0) })).unwrap();
        wal.append(&entry(
            1,
            WalOp::AddLabel {
                gid: Gid(0),
                label: LabelId(0),
                name: ArcStr::from("Person"),
            },
        ))
        .unwrap();
        wal.append(&entry(1, WalOp::Commit)).unwrap();
        wal.append(&entry(2, WalOp::Begin)).unwrap();
        wal.append(&entry(2, WalOp::CreateVertex { gid: Gid(1) })).unwrap();
        wal.sync().unwrap();

        let store = GraphStore::new(WorkerId(0));
        let engine = Engine::new();
        let info = recover(&store, &engine, dir.path()).unwrap();
        assert_eq!(info.wal_records_applied, 4);
        assert_eq!(info.max_tx, TxId(2));

        let empty = Snapshot::empty();
        let view = reader_view(&empty, &engine);
        assert_eq!(store.vertex_count(&view), 1);
        let person = store.catalogs().label_id("Person").unwrap();
        assert_eq!(
            store.vertices(&view, &VertexFilter::Label(person)).unwrap(),
            vec![Gid(0)]
        );
        // The engine resumes above everything seen.
        let tx = engine.begin();
        assert!(tx.id() > TxId(2));
    }

    #[test]
    fn cutoff_skips_pre_snapshot_transactions() {
        use crate::durability::snapshot::{write_snapshot, SnapshotBody};

        let dir = tempfile::tempdir().unwrap();
        // Snapshot cut at tx 100 already contains vertex 0.
        let body = SnapshotBody {
            vertices: vec![crate::durability::snapshot::SnapshotVertex {
                gid: Gid(0),
                labels: vec![],
                properties: vec![(PropertyId(0), Value::from(1i64))],
            }],
            properties: vec![ArcStr::from("v")],
            ..SnapshotBody::default()
        };
        write_snapshot(dir.path(), WorkerId(0), TxId(100), &body, -1).unwrap();

        let wal = WalManager::open(dir.path()).unwrap();
        // Tx 90 predates the snapshot: replaying it would double-apply.
        wal.append(&entry(
            90,
            WalOp::SetProperty {
                owner: WalOwner::Vertex,
                gid: Gid(0),
                property: PropertyId(0),
                name: ArcStr::from("v"),
                value: Value::from(90i64),
            },
        ))
        .unwrap();
        wal.append(&entry(90, WalOp::Commit)).unwrap();
        // Tx 110 is after the cutoff.
        wal.append(&entry(
            110,
            WalOp::SetProperty {
                owner: WalOwner::Vertex,
                gid: Gid(0),
                property: PropertyId(0),
                name: ArcStr::from("v"),
                value: Value::from(110i64),
            },
        ))
        .unwrap();
        wal.append(&entry(110, WalOp::Commit)).unwrap();
        wal.sync().unwrap();

        let store = GraphStore::new(WorkerId(0));
        let engine = Engine::new();
        let info = recover(&store, &engine, dir.path()).unwrap();
        assert_eq!(info.snapshot_cutoff, Some(TxId(100)));
        // Only tx 110's two records applied.
        assert_eq!(info.wal_records_applied, 2);

        let empty = Snapshot::empty();
        let view = reader_view(&empty, &engine);
        assert_eq!(
            store
                .vertex_property(&view, Gid(0), PropertyId(0))
                .unwrap(),
            Some(Value::from(110i64))
        );
    }

    #[test]
    fn corrupt_snapshot_steps_backward() {
        use crate::durability::snapshot::{write_snapshot, SnapshotBody};

        let dir = tempfile::tempdir().unwrap();
        let older = SnapshotBody {
            vertices: vec![crate::durability::snapshot::SnapshotVertex {
                gid: Gid(0),
                labels: vec![],
                properties: vec![],
            }],
            ..SnapshotBody::default()
        };
        write_snapshot(dir.path(), WorkerId(0), TxId(10), &older, -1).unwrap();
        let newer_path =
            write_snapshot(dir.path(), WorkerId(0), TxId(20), &SnapshotBody::default(), -1)
                .unwrap();
        // Corrupt the newer one.
        let mut bytes = std::fs::read(&newer_path).unwrap();
        let len = bytes.len();
        bytes[len / 2] ^= 0xFF;
        std::fs::write(&newer_path, &bytes).unwrap();

        let store = GraphStore::new(WorkerId(0));
        let engine = Engine::new();
        let info = recover(&store, &engine, dir.path()).unwrap();
        assert_eq!(info.snapshot_cutoff, Some(TxId(10)));
        let empty = Snapshot::empty();
        assert_eq!(store.vertex_count(&reader_view(&empty, &engine)), 1);
    }

    #[test]
    fn edge_replay_wires_endpoints() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WalManager::open(dir.path()).unwrap();
        let addr = |gid| GlobalAddress::new(WorkerId(0), Gid(gid));
        wal.append(&entry(1, WalOp::CreateVertex { gid: Gid(0) })).unwrap();
        wal.append(&entry(1, WalOp::CreateVertex { gid: Gid(1) })).unwrap();
        wal.append(&entry(
            1,
            WalOp::CreateEdge {
                gid: Gid(2),
                from: addr(0),
                to: addr(1),
                edge_type: arachne_common::types::EdgeTypeId(0),
                type_name: ArcStr::from("KNOWS"),
            },
        ))
        .unwrap();
        wal.append(&entry(1, WalOp::Commit)).unwrap();
        wal.sync().unwrap();

        let store = GraphStore::new(WorkerId(0));
        let engine = Engine::new();
        recover(&store, &engine, dir.path()).unwrap();

        let empty = Snapshot::empty();
        let view = reader_view(&empty, &engine);
        let from = store.vertex(&view, Gid(0)).unwrap();
        assert_eq!(from.out_edges.len(), 1);
        assert_eq!(from.out_edges[0].peer.gid, Gid(1));
        assert_eq!(store.edge_count(&view), 1);
        assert_eq!(store.catalogs().edge_type_id("KNOWS"), Some(arachne_common::types::EdgeTypeId(0)));
    }
}
