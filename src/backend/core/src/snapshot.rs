//! Best-effort JSON snapshot files.
//!
//! The cache and the queue both persist their full state as a single JSON
//! document after every mutation. Writes are spawned off the caller's path,
//! tagged with a sequence number taken while the caller still held its state
//! lock, and applied in order: a write that loses the race against a newer
//! snapshot is dropped instead of overwriting it. Failures are logged and
//! swallowed; the in-memory component stays authoritative.

use metrics::counter;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::error::{Result, TransflowError};

/// A snapshot file owned by one component.
#[derive(Debug)]
pub struct SnapshotFile {
    name: &'static str,
    path: PathBuf,
    sequence: AtomicU64,
    /// Sequence number of the last snapshot that reached disk
    written: Arc<Mutex<u64>>,
    tracker: TaskTracker,
}

impl SnapshotFile {
    /// Create a snapshot file. `name` labels logs and metrics.
    pub fn new(name: &'static str, path: impl Into<PathBuf>) -> Self {
        Self {
            name,
            path: path.into(),
            sequence: AtomicU64::new(0),
            written: Arc::new(Mutex::new(0)),
            tracker: TaskTracker::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize a snapshot document.
    pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    /// Load and decode the snapshot, if there is one.
    ///
    /// A missing file is not an error. Unreadable or corrupt files are logged
    /// and treated as empty.
    pub async fn load<T: DeserializeOwned>(&self) -> Option<T> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(snapshot = self.name, path = %self.path.display(), "No snapshot to load");
                return None;
            }
            Err(e) => {
                TransflowError::persistence(self.path.display(), e.to_string()).log();
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                TransflowError::persistence(self.path.display(), format!("corrupt snapshot: {}", e))
                    .log();
                None
            }
        }
    }

    /// Reserve the next sequence number. Call while holding the state lock
    /// the snapshot was taken under.
    pub fn next_sequence(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Write a snapshot in the background.
    pub fn schedule(&self, sequence: u64, data: Vec<u8>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(snapshot = self.name, "No async runtime available, snapshot write skipped");
            return;
        };

        let name = self.name;
        let path = self.path.clone();
        let written = self.written.clone();
        self.tracker.spawn_on(
            async move {
                write_sequenced(name, &path, &written, sequence, &data).await;
            },
            &handle,
        );
    }

    /// Write a snapshot and wait for it to land.
    pub async fn write(&self, sequence: u64, data: Vec<u8>) {
        write_sequenced(self.name, &self.path, &self.written, sequence, &data).await;
    }

    /// Wait until every scheduled write has finished.
    pub async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

async fn write_sequenced(
    name: &'static str,
    path: &Path,
    written: &Mutex<u64>,
    sequence: u64,
    data: &[u8],
) {
    let mut last = written.lock().await;
    if sequence <= *last {
        debug!(snapshot = name, sequence, last = *last, "Skipping stale snapshot");
        return;
    }

    match write_atomic(path, data).await {
        Ok(()) => {
            *last = sequence;
            counter!("transflow_snapshot_writes_total", "snapshot" => name, "outcome" => "ok")
                .increment(1);
            debug!(snapshot = name, sequence, bytes = data.len(), "Snapshot written");
        }
        Err(e) => {
            counter!("transflow_snapshot_writes_total", "snapshot" => name, "outcome" => "error")
                .increment(1);
            TransflowError::persistence(path.display(), e.to_string()).log();
        }
    }
}

/// Write to a sibling temp file and rename it over the target.
async fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, data).await?;
    tokio::fs::rename(&tmp, path).await
}
