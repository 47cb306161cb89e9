//! Error types for the transport module.

use thiserror::Error;

/// Errors that can occur while publishing over RTMP.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The publish session could not be established.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The stream header could not be negotiated.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// A packet write failed; the sink is unusable afterwards.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// Invalid RTMP URL.
    #[error("invalid RTMP URL: {0}")]
    InvalidUrl(String),

    /// The stream header was already written for this session.
    #[error("stream header already written")]
    HeaderAlreadyWritten,

    /// Packets were written before the stream header.
    #[error("stream header not written")]
    HeaderNotWritten,

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
