//! RTMP publishing for the restreamer.
//!
//! A thin blocking sink over `rml_rtmp`: dial, publish the stream header,
//! then write packets in the order handed down. All pacing decisions are
//! made upstream; the sink sends immediately on each call.

mod error;
mod sink;

pub use error::TransportError;
pub use sink::{PublishTarget, RtmpSink};

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
