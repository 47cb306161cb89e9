//! MP4 demuxing and repair for the restreamer.
//!
//! Wraps the `mp4` crate behind a small sequential-read interface and
//! shells out to ffmpeg when a file's container index is unreachable.

mod error;
mod packet;
mod repair;
mod source;

pub use error::MediaError;
pub use packet::{MediaPacket, StreamInfo, StreamKind};
pub use repair::repair_file;
pub use source::MediaSource;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;
