//! The property vault: out-of-heap storage for configured property names.
//!
//! Properties listed in `properties_on_disk` keep only a `u64` offset in
//! the record; the value itself lives in an append-only log file owned by
//! this process. Writes append `[u32 length][bincode value]` and return
//! the offset; reads seek back to it. Values are immutable once written -
//! a property update appends a fresh value and the record points at the
//! new offset, so version chains keep working unchanged.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use arachne_common::types::Value;
use arachne_common::utils::error::{Error, Result};
use parking_lot::Mutex;

/// Append-only value log for on-disk properties.
#[derive(Debug)]
pub struct PropertyVault {
    file: Mutex<File>,
    path: PathBuf,
}

impl PropertyVault {
    /// Opens (or creates) the vault file at `path`.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be created or opened read-write.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    /// Appends a value, returning the offset it was written at.
    ///
    /// # Errors
    ///
    /// Fails on I/O errors or if the encoded value exceeds `u32::MAX`
    /// bytes.
    pub fn append(&self, value: &Value) -> Result<u64> {
        let bytes = value.to_bytes();
        let len = u32::try_from(bytes.len())
            .map_err(|_| Error::Durability("vaulted property value too large".into()))?;
        let mut file = self.file.lock();
        let offset = file.seek(SeekFrom::End(0))?;
        file.write_all(&len.to_le_bytes())?;
        file.write_all(&bytes)?;
        Ok(offset)
    }

    /// Reads the value stored at `offset`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::Durability`] when the offset does not point at
    /// a valid entry.
    pub fn read(&self, offset: u64) -> Result<Value> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        let mut len_buf = [0u8; 4];
        file.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut bytes = vec![0u8; len];
        file.read_exact(&mut bytes)?;
        Value::from_bytes(&bytes)
            .map_err(|e| Error::Durability(format!("corrupt vault entry at {offset}: {e}")))
    }

    /// Path of the underlying log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
