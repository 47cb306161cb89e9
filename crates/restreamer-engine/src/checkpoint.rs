//! Persisted resume state.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::STALE_CHECKPOINT_AGE_DAYS;

/// Errors from the checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Resume record persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamCheckpoint {
    /// Base name of the file being streamed.
    pub current_file: String,

    /// Relative video position within the file.
    pub position: Duration,

    /// When the record was last written.
    pub last_save_time: DateTime<Utc>,

    /// Index of the file in the play order.
    pub file_index: usize,
}

impl Default for StreamCheckpoint {
    fn default() -> Self {
        Self {
            current_file: String::new(),
            position: Duration::ZERO,
            last_save_time: Utc::now(),
            file_index: 0,
        }
    }
}

/// Shared in-memory checkpoint record, updated by the send loop and
/// snapshotted by the background saver.
pub type SharedCheckpoint = Arc<Mutex<StreamCheckpoint>>;

/// Persists one checkpoint record at a fixed path.
///
/// Clones share a write lock, so concurrent savers never interleave and
/// a loaded record always matches one complete save.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Serialize the record and atomically replace the state file.
    pub fn save(&self, record: &StreamCheckpoint) -> Result<(), CheckpointError> {
        let mut stamped = record.clone();
        stamped.last_save_time = Utc::now();
        let data = serde_json::to_vec_pretty(&stamped)?;

        let _guard = self.write_lock.lock();
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &self.path)?;
        debug!(
            file = %stamped.current_file,
            position = ?stamped.position,
            "checkpoint saved"
        );
        Ok(())
    }

    /// Load the saved record. Absent or stale state reads as `None`.
    pub fn load(&self) -> Result<Option<StreamCheckpoint>, CheckpointError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let record: StreamCheckpoint = serde_json::from_slice(&data)?;

        let age = Utc::now().signed_duration_since(record.last_save_time);
        if age > chrono::Duration::days(STALE_CHECKPOINT_AGE_DAYS) {
            warn!(
                "saved state is older than {} days, starting fresh",
                STALE_CHECKPOINT_AGE_DAYS
            );
            return Ok(None);
        }
        Ok(Some(record))
    }
}
