//! The write-ahead log.
//!
//! Every mutation is appended as a record before commit; commit appends
//! the commit record last. Records are length-prefixed and checksummed so
//! recovery can detect a torn tail and truncate back to the last valid
//! record. In synchronous-commit mode the caller syncs through the commit
//! record before acknowledging; otherwise a background flusher syncs on a
//! cadence.
//!
//! Payloads carry both the interned id and the name of every label /
//! edge-type / property they reference: the ids keep replay cheap, the
//! names let recovery rebuild interning tables for entries newer than the
//! snapshot's.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use arachne_common::types::{
    CommandId, EdgeTypeId, Gid, GlobalAddress, LabelId, PropertyId, TxId, Value,
};
use arachne_common::utils::error::{Error, Result};
use arcstr::ArcStr;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// File name of the log inside the durability directory.
pub const WAL_FILE: &str = "wal.log";

/// Whether a property record targets a vertex or an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalOwner {
    /// The property lives on a vertex.
    Vertex,
    /// The property lives on an edge.
    Edge,
}

/// Operation payload of one WAL record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WalOp {
    /// Transaction began.
    Begin,
    /// Transaction committed. Always the transaction's last record.
    Commit,
    /// Transaction aborted.
    Abort,
    /// A vertex was created.
    CreateVertex {
        /// Its local id.
        gid: Gid,
    },
    /// An edge was created.
    CreateEdge {
        /// Its local id.
        gid: Gid,
        /// Source vertex.
        from: GlobalAddress,
        /// Target vertex.
        to: GlobalAddress,
        /// Interned edge type.
        edge_type: EdgeTypeId,
        /// Its name, for catalog rebuild.
        type_name: ArcStr,
    },
    /// A label was added to a vertex.
    AddLabel {
        /// The vertex.
        gid: Gid,
        /// Interned label.
        label: LabelId,
        /// Its name.
        name: ArcStr,
    },
    /// A label was removed from a vertex.
    RemoveLabel {
        /// The vertex.
        gid: Gid,
        /// Interned label.
        label: LabelId,
        /// Its name.
        name: ArcStr,
    },
    /// A property was set.
    SetProperty {
        /// Vertex or edge.
        owner: WalOwner,
        /// The entity.
        gid: Gid,
        /// Interned property.
        property: PropertyId,
        /// Its name.
        name: ArcStr,
        /// The new value.
        value: Value,
    },
    /// A property was removed.
    RemoveProperty {
        /// Vertex or edge.
        owner: WalOwner,
        /// The entity.
        gid: Gid,
        /// Interned property.
        property: PropertyId,
        /// Its name.
        name: ArcStr,
    },
    /// A vertex was deleted.
    DeleteVertex {
        /// The vertex.
        gid: Gid,
    },
    /// An edge was deleted.
    DeleteEdge {
        /// The edge.
        gid: Gid,
    },
    /// An index was built.
    BuildIndex {
        /// The label.
        label: LabelId,
        /// Its name.
        label_name: ArcStr,
        /// The property, for label+property indexes.
        property: Option<(PropertyId, ArcStr)>,
    },
}

/// One WAL record: the stamping transaction and command, plus the
/// operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Stamping transaction.
    pub tx: TxId,
    /// Its command counter at the time.
    pub cmd: CommandId,
    /// The operation.
    pub op: WalOp,
}

/// Appends records to the log file.
pub struct WalManager {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl WalManager {
    /// Opens (or creates) the log inside `dir`.
    ///
    /// # Errors
    ///
    /// Fails when the directory or file cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(WAL_FILE);
        let file = OpenOptions::new().append(true).create(true).open(&path)?;
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path,
        })
    }

    /// Appends one record: `[u32 len][u32 crc32][bincode entry]`.
    ///
    /// The record lands in the writer's buffer; durability needs
    /// [`flush`](Self::flush) or [`sync`](Self::sync).
    ///
    /// # Errors
    ///
    /// Fails on encoding or I/O errors.
    pub fn append(&self, entry: &WalEntry) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(entry, bincode::config::standard())
            .map_err(|e| Error::Durability(format!("wal encode: {e}")))?;
        let len = u32::try_from(bytes.len())
            .map_err(|_| Error::Durability("wal record too large".into()))?;
        let crc = crc32fast::hash(&bytes);
        let mut writer = self.writer.lock();
        writer.write_all(&len.to_le_bytes())?;
        writer.write_all(&crc.to_le_bytes())?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    /// Pushes buffered records to the OS.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    pub fn flush(&self) -> Result<()> {
        self.writer.lock().flush()?;
        Ok(())
    }

    /// Flushes and fsyncs the log file.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors.
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Outcome of reading a log file back.
pub struct WalContents {
    /// The decodable records, in file order.
    pub entries: Vec<WalEntry>,
    /// Byte length of the valid prefix. Anything past it is torn or
    /// corrupt and should be truncated away.
    pub valid_len: u64,
}

/// Reads every valid record from a log file.
///
/// Stops (without error) at the first torn or checksum-failing record;
/// `valid_len` tells the caller where to truncate.
///
/// # Errors
///
/// Fails only on I/O errors reading the file.
pub fn read_wal(path: impl AsRef<Path>) -> Result<WalContents> {
    let path = path.as_ref();
    if !path.exists() {
        return Ok(WalContents {
            entries: Vec::new(),
            valid_len: 0,
        });
    }
    let data = std::fs::read(path)?;
    let mut entries = Vec::new();
    let mut pos = 0usize;
    loop {
        if pos + 8 > data.len() {
            break;
        }
        let len =
            u32::from_le_bytes(data[pos..pos + 4].try_into().expect("4-byte slice")) as usize;
        let crc = u32::from_le_bytes(data[pos + 4..pos + 8].try_into().expect("4-byte slice"));
        let body_start = pos + 8;
        let body_end = body_start + len;
        if body_end > data.len() {
            tracing::warn!("wal: torn record at offset {pos}, truncating");
            break;
        }
        let body = &data[body_start..body_end];
        if crc32fast::hash(body) != crc {
            tracing::warn!("wal: checksum mismatch at offset {pos}, truncating");
            break;
        }
        match bincode::serde::decode_from_slice::<WalEntry, _>(body, bincode::config::standard()) {
            Ok((entry, _)) => entries.push(entry),
            Err(e) => {
                tracing::warn!("wal: undecodable record at offset {pos}: {e}, truncating");
                break;
            }
        }
        pos = body_end;
    }
    Ok(WalContents {
        entries,
        valid_len: pos as u64,
    })
}

/// Truncates the log to its valid prefix.
///
/// # Errors
///
/// Fails on I/O errors.
pub fn truncate_wal(path: impl AsRef<Path>, valid_len: u64) -> Result<()> {
    let file = OpenOptions::new().write(true).open(path.as_ref())?;
    file.set_len(valid_len)?;
    file.sync_data()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(tx: u64, op: WalOp) -> WalEntry {
        WalEntry {
            tx: TxId(tx),
            cmd: CommandId(1),
            op,
        }
    }

    #[test]
    fn append_read_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WalManager::open(dir.path()).unwrap();
        wal.append(&entry(1, WalOp::Begin)).unwrap();
        wal.append(&entry(1, WalOp::CreateVertex { gid: Gid(0) })).unwrap();
        wal.append(&entry(
            1,
            WalOp::SetProperty {
                owner: WalOwner::Vertex,
                gid: Gid(0),
                property: PropertyId(0),
                name: ArcStr::from("age"),
                value: Value::from(30i64),
            },
        ))
        .unwrap();
        wal.append(&entry(1, WalOp::Commit)).unwrap();
        wal.sync().unwrap();

        let contents = read_wal(wal.path()).unwrap();
        assert_eq!(contents.entries.len(), 4);
        assert!(matches!(contents.entries[3].op, WalOp::Commit));
        assert_eq!(contents.entries[0].tx, TxId(1));
    }

    #[test]
    fn torn_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WalManager::open(dir.path()).unwrap();
        wal.append(&entry(1, WalOp::Begin)).unwrap();
        wal.append(&entry(1, WalOp::Commit)).unwrap();
        wal.sync().unwrap();
        let good_len = std::fs::metadata(wal.path()).unwrap().len();

        // Simulate a crash mid-append.
        wal.append(&entry(2, WalOp::Begin)).unwrap();
        wal.sync().unwrap();
        let full_len = std::fs::metadata(wal.path()).unwrap().len();
        let file = OpenOptions::new().write(true).open(wal.path()).unwrap();
        file.set_len(full_len - 3).unwrap();

        let contents = read_wal(wal.path()).unwrap();
        assert_eq!(contents.entries.len(), 2);
        assert_eq!(contents.valid_len, good_len);

        truncate_wal(wal.path(), contents.valid_len).unwrap();
        assert_eq!(std::fs::metadata(wal.path()).unwrap().len(), good_len);
    }

    #[test]
    fn corrupt_record_stops_the_read() {
        let dir = tempfile::tempdir().unwrap();
        let wal = WalManager::open(dir.path()).unwrap();
        wal.append(&entry(1, WalOp::Commit)).unwrap();
        wal.append(&entry(2, WalOp::Commit)).unwrap();
        wal.sync().unwrap();

        // Flip a byte in the second record's body.
        let mut data = std::fs::read(wal.path()).unwrap();
        let last = data.len() - 1;
        data[last] ^= 0xFF;
        std::fs::write(wal.path(), &data).unwrap();

        let contents = read_wal(wal.path()).unwrap();
        assert_eq!(contents.entries.len(), 1);
    }

    #[test]
    fn missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let contents = read_wal(dir.path().join("nope.log")).unwrap();
        assert!(contents.entries.is_empty());
        assert_eq!(contents.valid_len, 0);
    }
}
