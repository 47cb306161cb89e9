//! Error types for the media module.

use thiserror::Error;

/// Errors that can occur while demuxing or repairing files.
#[derive(Debug, Error)]
pub enum MediaError {
    /// The container index could not be located.
    #[error("invalid MP4 structure: {0}")]
    InvalidStructure(String),

    /// Demuxing failed.
    #[error("demux failed: {0}")]
    Demux(String),

    /// The external repair run failed.
    #[error("repair failed: {0}")]
    RepairFailed(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
