//! Status file change notification
//!
//! Polls the status file's modification time and signals a capacity-1
//! channel whenever it changes. The channel coalesces: rewrites arriving
//! while the reconciler is mid-batch collapse into one pending signal, so
//! batches never queue up behind each other.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Create the coalescing dirty channel
#[must_use]
pub fn dirty_channel() -> (mpsc::Sender<()>, mpsc::Receiver<()>) {
    mpsc::channel(1)
}

/// Spawn the watcher task
///
/// Emits one signal immediately so the first reconciliation runs without
/// waiting for a rewrite, then one signal per observed mtime change. A full
/// channel means a batch is already pending and the signal is dropped.
pub fn spawn_watcher(
    path: PathBuf,
    interval: Duration,
    tx: mpsc::Sender<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_mtime: Option<SystemTime> = None;
        let mut ticker = tokio::time::interval(interval);

        let _ = tx.try_send(());

        loop {
            ticker.tick().await;

            let mtime = match tokio::fs::metadata(&path).await {
                Ok(meta) => meta.modified().ok(),
                Err(e) => {
                    trace!(path = ?path, error = %e, "Status file not readable yet");
                    continue;
                }
            };

            if mtime != last_mtime {
                last_mtime = mtime;
                if tx.try_send(()).is_ok() {
                    debug!(path = ?path, "Status file changed");
                }
            }
        }
    })
}
