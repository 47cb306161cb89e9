//! Shared packet and stream-descriptor types.

use std::time::Duration;

use bytes::Bytes;

/// A single timed frame as delivered by the demuxer.
///
/// Apart from the keyframe flag, which the pacing layer may force on,
/// packets are never modified after they are read.
#[derive(Debug, Clone)]
pub struct MediaPacket {
    /// Index of the stream this packet belongs to.
    pub stream_index: usize,

    /// Timestamp since the stream origin, as stored in the container.
    pub time: Duration,

    /// Keyframe flag.
    pub is_keyframe: bool,

    /// Encoded payload.
    pub data: Bytes,
}

/// What a stream carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamKind {
    /// Video track with its frame dimensions.
    Video { width: u32, height: u32 },

    /// Audio track with its sample rate and channel count.
    Audio { sample_rate: u32, channels: u8 },

    /// Anything else (subtitles, metadata tracks).
    Other,
}

/// Per-stream descriptor used for the publish header and packet routing.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    /// Position of the stream in read order.
    pub index: usize,

    /// Stream contents.
    pub kind: StreamKind,
}

impl StreamInfo {
    /// Check if this is a video stream.
    pub fn is_video(&self) -> bool {
        matches!(self.kind, StreamKind::Video { .. })
    }

    /// Check if this is an audio stream.
    pub fn is_audio(&self) -> bool {
        matches!(self.kind, StreamKind::Audio { .. })
    }
}
