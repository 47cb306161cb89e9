//! Error taxonomy for the engine.

use thiserror::Error;

use restreamer_media::MediaError;
use restreamer_transport::TransportError;

use crate::checkpoint::CheckpointError;
use crate::config::ConfigError;

/// Errors surfaced by the engine and supervisor.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Fatal configuration problem at startup.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Demux-side failure.
    #[error("media error: {0}")]
    Media(#[from] MediaError),

    /// Publish-side failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Checkpoint persistence failure. Logged, never fatal.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// The file has no usable streams.
    #[error("no audio or video streams found in {0}")]
    NoStreams(String),
}
