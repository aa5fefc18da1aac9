//! Point-in-time snapshots of the graph.
//!
//! A snapshot is taken against a read-only transaction: the visible
//! vertices and edges, the three interning tables, and the index
//! definitions, bincode-encoded behind a magic + version header and
//! protected by a trailing crc32. The file is written to a temporary
//! name, fsync'd, then atomically renamed; only after the rename do we
//! prune snapshots beyond the retention count.

use std::io::Write;
use std::path::{Path, PathBuf};

use arachne_common::mvcc::ChainView;
use arachne_common::types::{
    EdgeTypeId, Gid, GlobalAddress, LabelId, PropertyId, TxId, Value, WorkerId,
};
use arachne_common::utils::error::{Error, Result};
use arachne_core::record::PropertyEntry;
use arachne_core::store::VertexFilter;
use arachne_core::GraphStore;
use arcstr::ArcStr;
use serde::{Deserialize, Serialize};

/// Leading magic of every snapshot file.
pub const SNAPSHOT_MAGIC: &[u8; 8] = b"ARACSNAP";

/// Format version readers accept.
pub const SNAPSHOT_VERSION: u16 = 1;

/// One vertex in a snapshot, with properties fully inlined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotVertex {
    /// Local id.
    pub gid: Gid,
    /// Labels.
    pub labels: Vec<LabelId>,
    /// Properties, resolved to plain values.
    pub properties: Vec<(PropertyId, Value)>,
}

/// One edge in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEdge {
    /// Local id.
    pub gid: Gid,
    /// Source vertex address.
    pub from: GlobalAddress,
    /// Target vertex address.
    pub to: GlobalAddress,
    /// Edge type.
    pub edge_type: EdgeTypeId,
    /// Properties, resolved to plain values.
    pub properties: Vec<(PropertyId, Value)>,
}

/// Everything a snapshot carries besides the header.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotBody {
    /// Label table, in id order.
    pub labels: Vec<ArcStr>,
    /// Edge-type table, in id order.
    pub edge_types: Vec<ArcStr>,
    /// Property table, in id order.
    pub properties: Vec<ArcStr>,
    /// Visible vertices.
    pub vertices: Vec<SnapshotVertex>,
    /// Visible edges.
    pub edges: Vec<SnapshotEdge>,
    /// Declared label indexes.
    pub label_indexes: Vec<LabelId>,
    /// Declared label+property indexes.
    pub label_property_indexes: Vec<(LabelId, PropertyId)>,
}

/// File name for a snapshot cut at `cutoff` on `worker`. Zero-padding
/// keeps lexicographic and chronological order identical.
#[must_use]
pub fn snapshot_file_name(worker: WorkerId, cutoff: TxId) -> String {
    format!("snapshot_w{}_tx_{:020}", worker.as_u16(), cutoff.as_u64())
}

/// Parses a snapshot file name back into (worker, cutoff).
#[must_use]
pub fn parse_snapshot_file_name(name: &str) -> Option<(WorkerId, TxId)> {
    let rest = name.strip_prefix("snapshot_w")?;
    let (worker, cutoff) = rest.split_once("_tx_")?;
    Some((
        WorkerId(worker.parse().ok()?),
        TxId(cutoff.parse().ok()?),
    ))
}

/// Lists snapshots in `dir`, oldest first.
///
/// # Errors
///
/// Fails on I/O errors reading the directory.
pub fn list_snapshots(dir: impl AsRef<Path>) -> Result<Vec<(TxId, PathBuf)>> {
    let mut found = Vec::new();
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(found);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some((_, cutoff)) = parse_snapshot_file_name(name) {
            found.push((cutoff, entry.path()));
        }
    }
    found.sort_by_key(|(cutoff, _)| *cutoff);
    Ok(found)
}

/// Dumps the store as seen by `view` into a [`SnapshotBody`].
///
/// # Errors
///
/// Fails when a vaulted property cannot be resolved.
pub fn collect_body(store: &GraphStore, view: &ChainView<'_>) -> Result<SnapshotBody> {
    let catalogs = store.catalogs();
    let mut body = SnapshotBody {
        labels: catalogs.labels().dump(),
        edge_types: catalogs.edge_types().dump(),
        properties: catalogs.properties().dump(),
        ..SnapshotBody::default()
    };

    for gid in store.vertices(view, &VertexFilter::All)? {
        let record = store
            .vertex(view, gid)
            .ok_or_else(|| Error::Durability("vertex vanished mid-snapshot".into()))?;
        let mut properties = Vec::with_capacity(record.properties.len());
        for (pid, entry) in record.properties.iter() {
            properties.push((pid, store.resolve_entry(entry)?));
        }
        properties.sort_by_key(|(pid, _)| pid.0);
        body.vertices.push(SnapshotVertex {
            gid,
            labels: record.labels.to_vec(),
            properties,
        });
    }

    for gid in store.edges(view) {
        let record = store
            .edge(view, gid)
            .ok_or_else(|| Error::Durability("edge vanished mid-snapshot".into()))?;
        let mut properties = Vec::with_capacity(record.properties.len());
        for (pid, entry) in record.properties.iter() {
            properties.push((pid, store.resolve_entry(entry)?));
        }
        properties.sort_by_key(|(pid, _)| pid.0);
        body.edges.push(SnapshotEdge {
            gid,
            from: record.from,
            to: record.to,
            edge_type: record.edge_type,
            properties,
        });
    }

    let (labels, pairs) = store.indexes().definitions();
    body.label_indexes = labels;
    body.label_property_indexes = pairs;
    Ok(body)
}

/// Writes a snapshot of `body` cut at `cutoff`, then prunes old snapshots
/// beyond `max_retained` (`-1` keeps everything). Returns the final path.
///
/// # Errors
///
/// Fails on encoding or I/O errors; a failed write leaves at most a
/// `.tmp` file behind and never touches existing snapshots.
pub fn write_snapshot(
    dir: impl AsRef<Path>,
    worker: WorkerId,
    cutoff: TxId,
    body: &SnapshotBody,
    max_retained: i64,
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    let encoded = bincode::serde::encode_to_vec(body, bincode::config::standard())
        .map_err(|e| Error::Durability(format!("snapshot encode: {e}")))?;

    let mut bytes = Vec::with_capacity(encoded.len() + 32);
    bytes.extend_from_slice(SNAPSHOT_MAGIC);
    bytes.extend_from_slice(&SNAPSHOT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&cutoff.as_u64().to_le_bytes());
    bytes.extend_from_slice(&encoded);
    let crc = crc32fast::hash(&bytes);
    bytes.extend_from_slice(&crc.to_le_bytes());

    let final_path = dir.join(snapshot_file_name(worker, cutoff));
    let tmp_path = final_path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, &final_path)?;
    // Make the rename durable before pruning anything older.
    if let Ok(dir_handle) = std::fs::File::open(dir) {
        let _ = dir_handle.sync_all();
    }

    if max_retained >= 0 {
        let snapshots = list_snapshots(dir)?;
        let excess = snapshots.len().saturating_sub(max_retained as usize);
        for (_, path) in snapshots.into_iter().take(excess) {
            if path != final_path {
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!("failed to prune snapshot {}: {e}", path.display());
                }
            }
        }
    }
    Ok(final_path)
}

/// Reads and verifies one snapshot file.
///
/// # Errors
///
/// Fails with [`Error::Durability`] on bad magic, an unsupported version,
/// a checksum mismatch, or an undecodable body.
pub fn read_snapshot(path: impl AsRef<Path>) -> Result<(TxId, SnapshotBody)> {
    let bytes = std::fs::read(path.as_ref())?;
    if bytes.len() < SNAPSHOT_MAGIC.len() + 2 + 8 + 4 {
        return Err(Error::Durability("snapshot file too short".into()));
    }
    let (content, crc_bytes) = bytes.split_at(bytes.len() - 4);
    let stored_crc = u32::from_le_bytes(crc_bytes.try_into().expect("4-byte slice"));
    if crc32fast::hash(content) != stored_crc {
        return Err(Error::Durability("snapshot checksum mismatch".into()));
    }
    if &content[..8] != SNAPSHOT_MAGIC {
        return Err(Error::Durability("bad snapshot magic".into()));
    }
    let version = u16::from_le_bytes(content[8..10].try_into().expect("2-byte slice"));
    if version != SNAPSHOT_VERSION {
        return Err(Error::Durability(format!(
            "unsupported snapshot version {version}"
        )));
    }
    let cutoff = TxId(u64::from_le_bytes(content[10..18].try_into().expect("8-byte slice")));
    let (body, _) =
        bincode::serde::decode_from_slice(&content[18..], bincode::config::standard())
            .map_err(|e| Error::Durability(format!("snapshot decode: {e}")))?;
    Ok((cutoff, body))
}

/// Loads a snapshot body into an empty store: interning tables first,
/// then entities, then the declared indexes.
///
/// # Errors
///
/// Fails when index building fails.
pub fn load_body(store: &GraphStore, view: &ChainView<'_>, body: &SnapshotBody) -> Result<()> {
    let catalogs = store.catalogs();
    for (id, name) in body.labels.iter().enumerate() {
        catalogs.labels().install(name, id as u32);
    }
    for (id, name) in body.edge_types.iter().enumerate() {
        catalogs.edge_types().install(name, id as u32);
    }
    for (id, name) in body.properties.iter().enumerate() {
        catalogs.properties().install(name, id as u32);
    }

    for vertex in &body.vertices {
        let mut record = arachne_core::VertexRecord::new();
        for label in &vertex.labels {
            record.add_label(*label);
        }
        for (pid, value) in &vertex.properties {
            record
                .properties
                .set(*pid, PropertyEntry::Inline(value.clone()));
        }
        store.install_vertex(vertex.gid, record);
    }

    for edge in &body.edges {
        let mut record = arachne_core::EdgeRecord::new(edge.edge_type, edge.from, edge.to);
        for (pid, value) in &edge.properties {
            record
                .properties
                .set(*pid, PropertyEntry::Inline(value.clone()));
        }
        store.install_edge(edge.gid, record);
        let entry = arachne_core::EdgeEntry {
            edge: store.address(edge.gid),
            peer: edge.to,
            edge_type: edge.edge_type,
        };
        store.replay_vertex_update(edge.from.gid, |r| r.out_edges.push(entry))?;
        let entry = arachne_core::EdgeEntry {
            edge: store.address(edge.gid),
            peer: edge.from,
            edge_type: edge.edge_type,
        };
        store.replay_vertex_update(edge.to.gid, |r| r.in_edges.push(entry))?;
    }

    for label in &body.label_indexes {
        store.build_index(view, *label, None)?;
    }
    for (label, property) in &body.label_property_indexes {
        store.build_index(view, *label, Some(*property))?;
    }
    Ok(())
}
