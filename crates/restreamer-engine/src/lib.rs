//! Core engine for the restreamer: pacing, checkpointing, supervision.
//!
//! This crate coordinates the media source and the RTMP sink to publish
//! a directory of MP4 files as one endless live stream: a real-time
//! send loop per file, a supervisor cycling over the directory, and a
//! small persisted checkpoint for crash recovery.

mod bitrate;
mod checkpoint;
mod config;
mod error;
mod pacer;
mod playlist;
mod supervisor;

pub use bitrate::BitrateMeter;
pub use checkpoint::{CheckpointError, CheckpointStore, SharedCheckpoint, StreamCheckpoint};
pub use config::{Config, ConfigError, RtmpConfig, StreamSettings, VideoConfig};
pub use error::EngineError;
pub use pacer::{Pacer, PacketSink, PacketSource, StreamOutcome};
pub use playlist::{scan_directory, FileEntry};
pub use supervisor::Supervisor;

use std::time::Duration;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Maximum attempts per file before moving on.
pub const MAX_RETRIES: u32 = 3;

/// Delay between attempts on the same file.
pub const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Remaining-time threshold at which the next file is prepared.
pub const PRELOAD_NEXT_FILE_TIME: Duration = Duration::from_secs(5);

/// Bitrate floor below which a warning is emitted (1.5 Mbps).
pub const MIN_BITRATE: u64 = 1_500_000;

/// Pause after too many consecutive failures.
pub const RECONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Consecutive failed files before the long pause.
pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Default minimum time each file stays on air.
pub const MIN_PLAY_TIME: Duration = Duration::from_secs(60);

/// Checkpoint file in the working directory.
pub const STATE_FILE_PATH: &str = "stream_state.json";

/// Interval between periodic checkpoint saves.
pub const SAVE_STATE_INTERVAL: Duration = Duration::from_secs(30);

/// Interval between status lines in the send loop.
pub const STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Pacing delays above this cap trigger a clock rebase instead of a sleep.
pub const MAX_PACING_DELAY: Duration = Duration::from_millis(500);

/// Wall-clock a file must have streamed before early end is considered.
pub const EARLY_END_MIN_ELAPSED: Duration = Duration::from_secs(30);

/// Checkpoints older than this are ignored on load.
pub const STALE_CHECKPOINT_AGE_DAYS: i64 = 7;

/// Sleep between rescans while the directory has no files.
pub const EMPTY_DIRECTORY_RETRY: Duration = Duration::from_secs(5);

/// Moving-average window of the session meter, in one-second buckets.
pub const SESSION_METER_WINDOW: usize = 10;

/// Moving-average window of the per-file meter, in one-second buckets.
pub const FILE_METER_WINDOW: usize = 5;
