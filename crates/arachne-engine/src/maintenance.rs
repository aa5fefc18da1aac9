//! Periodic background work with self-tuning timing.
//!
//! The WAL flusher, the snapshot cadence and the storage GC all share the
//! same shape: a named thread, a target interval, and a shutdown
//! handshake over an mpsc channel. The wait between runs adapts to how
//! long the last run took, so slow disks don't stack up latency spikes:
//!
//! ```text
//! wait_time = target_interval - last_run_duration
//! ```

use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A background thread running a task on a cadence.
///
/// Dropping the task shuts the thread down; `final_pass` controls
/// whether the task runs one last time on the way out (a WAL flusher
/// wants that, a snapshooter does not).
pub struct PeriodicTask {
    name: &'static str,
    shutdown_tx: Option<mpsc::Sender<mpsc::Sender<()>>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    /// Spawns a named thread running `task` every `interval`,
    /// approximately.
    #[must_use]
    pub fn spawn(
        name: &'static str,
        interval: Duration,
        final_pass: bool,
        mut task: impl FnMut() + Send + 'static,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<mpsc::Sender<()>>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut last_duration = Duration::ZERO;
                loop {
                    let timeout = interval.saturating_sub(last_duration);
                    match shutdown_rx.recv_timeout(timeout) {
                        Ok(ack_tx) => {
                            if final_pass {
                                task();
                            }
                            let _ = ack_tx.send(());
                            return;
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            let start = Instant::now();
                            task();
                            last_duration = start.elapsed();
                        }
                        Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            })
            .expect("failed to spawn maintenance thread");

        Self {
            name,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Stops the thread, running the task one final time.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let (ack_tx, ack_rx) = mpsc::channel();
            if tx.send(ack_tx).is_ok() {
                let _ = ack_rx.recv();
            }
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("maintenance thread {} panicked", self.name);
            }
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.shutdown();
    }
}
