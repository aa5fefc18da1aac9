//! Database configuration.

use std::path::PathBuf;

use arachne_common::types::WorkerId;
use arachne_common::utils::error::{Error, Result};

/// Lower bound on the snapshot cadence.
pub const MIN_SNAPSHOT_CYCLE_SEC: i64 = 60;

/// Database configuration.
///
/// Defaults mirror a bare coordinator with durability off. Builder-style
/// `with_*` methods cover the common overrides; call
/// [`validate`](Self::validate) (the database does it for you) before
/// trusting a hand-assembled value.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)] // Config structs naturally have many boolean flags
pub struct Config {
    /// This node's worker id; `0` is the coordinator.
    pub worker_id: WorkerId,

    /// Whether the snapshotter and the write-ahead log run at all.
    pub durability_enabled: bool,

    /// Directory for snapshot and WAL files.
    pub durability_directory: PathBuf,

    /// Recover from the newest snapshot + WAL on startup.
    pub db_recover_on_startup: bool,

    /// Seconds between two snapshots (minimum 60).
    pub snapshot_cycle_sec: i64,

    /// Number of retained snapshots; `-1` keeps all of them.
    pub snapshot_max_retained: i64,

    /// Take one final snapshot when the database closes.
    pub snapshot_on_exit: bool,

    /// Fsync the WAL through the commit record before a commit returns.
    pub synchronous_commit: bool,

    /// Seconds between storage GC cycles; `-1` disables GC.
    pub gc_cycle_sec: i64,

    /// Maximum query execution time in seconds; `-1` disables the
    /// deadline.
    pub query_execution_time_sec: i64,

    /// Property names whose values are stored out of the main heap, in
    /// the process-local property vault.
    pub properties_on_disk: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_id: WorkerId::COORDINATOR,
            durability_enabled: false,
            durability_directory: PathBuf::from("durability"),
            db_recover_on_startup: false,
            snapshot_cycle_sec: 3600,
            snapshot_max_retained: -1,
            snapshot_on_exit: false,
            synchronous_commit: false,
            gc_cycle_sec: 30,
            query_execution_time_sec: 180,
            properties_on_disk: Vec::new(),
        }
    }
}

impl Config {
    /// Configuration for a throwaway in-memory database: no durability,
    /// no GC thread, no query deadline. What the tests want.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            durability_enabled: false,
            gc_cycle_sec: -1,
            query_execution_time_sec: -1,
            ..Self::default()
        }
    }

    /// Configuration for a durable database rooted at `dir`.
    #[must_use]
    pub fn durable(dir: impl Into<PathBuf>) -> Self {
        Self {
            durability_enabled: true,
            durability_directory: dir.into(),
            db_recover_on_startup: true,
            ..Self::default()
        }
    }

    /// Sets the worker id.
    #[must_use]
    pub fn with_worker_id(mut self, worker_id: WorkerId) -> Self {
        self.worker_id = worker_id;
        self
    }

    /// Sets the snapshot cadence in seconds.
    #[must_use]
    pub fn with_snapshot_cycle_sec(mut self, secs: i64) -> Self {
        self.snapshot_cycle_sec = secs;
        self
    }

    /// Sets the snapshot retention count (`-1` = unlimited).
    #[must_use]
    pub fn with_snapshot_max_retained(mut self, count: i64) -> Self {
        self.snapshot_max_retained = count;
        self
    }

    /// Enables the final snapshot on close.
    #[must_use]
    pub fn with_snapshot_on_exit(mut self) -> Self {
        self.snapshot_on_exit = true;
        self
    }

    /// Enables synchronous commit.
    #[must_use]
    pub fn with_synchronous_commit(mut self) -> Self {
        self.synchronous_commit = true;
        self
    }

    /// Sets the GC cadence in seconds (`-1` disables).
    #[must_use]
    pub fn with_gc_cycle_sec(mut self, secs: i64) -> Self {
        self.gc_cycle_sec = secs;
        self
    }

    /// Sets the query deadline in seconds (`-1` disables).
    #[must_use]
    pub fn with_query_execution_time_sec(mut self, secs: i64) -> Self {
        self.query_execution_time_sec = secs;
        self
    }

    /// Sets the properties stored in the vault, from a comma-separated
    /// list of names.
    #[must_use]
    pub fn with_properties_on_disk(mut self, names: &str) -> Self {
        self.properties_on_disk = names
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        self
    }

    /// Checks the configuration for nonsense.
    ///
    /// # Errors
    ///
    /// Fails when the snapshot cadence is below the minimum or a durable
    /// setup has an empty durability directory.
    pub fn validate(&self) -> Result<()> {
        if self.durability_enabled && self.snapshot_cycle_sec < MIN_SNAPSHOT_CYCLE_SEC {
            return Err(Error::Durability(format!(
                "snapshot_cycle_sec must be at least {MIN_SNAPSHOT_CYCLE_SEC}, got {}",
                self.snapshot_cycle_sec
            )));
        }
        if (self.durability_enabled || !self.properties_on_disk.is_empty())
            && self.durability_directory.as_os_str().is_empty()
        {
            return Err(Error::Durability(
                "durability_directory must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_flags() {
        let config = Config::default();
        assert!(!config.durability_enabled);
        assert_eq!(config.snapshot_cycle_sec, 3600);
        assert_eq!(config.snapshot_max_retained, -1);
        assert_eq!(config.gc_cycle_sec, 30);
        assert_eq!(config.query_execution_time_sec, 180);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cadence_below_minimum_rejected() {
        let config = Config::durable("/tmp/x").with_snapshot_cycle_sec(10);
        assert!(config.validate().is_err());
        // Non-durable setups may carry any cadence; it is unused.
        let config = Config::in_memory().with_snapshot_cycle_sec(10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn properties_on_disk_parsing() {
        let config = Config::in_memory().with_properties_on_disk("embedding, blob ,,raw");
        assert_eq!(config.properties_on_disk, vec!["embedding", "blob", "raw"]);
    }
}
