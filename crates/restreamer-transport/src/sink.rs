//! Blocking RTMP publish sink.

use std::time::Duration;

use rml_rtmp::handshake::{Handshake, HandshakeProcessResult, PeerType};
use rml_rtmp::sessions::{
    ClientSession, ClientSessionConfig, ClientSessionEvent, ClientSessionResult,
    PublishRequestType, StreamMetadata,
};
use rml_rtmp::time::RtmpTimestamp;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::runtime::Runtime;
use tracing::{debug, info, trace};
use url::Url;

use restreamer_media::{MediaPacket, StreamInfo, StreamKind};

use crate::error::TransportError;
use crate::TransportResult;

/// Timeout waiting for the server to accept connection and publish requests.
const ACCEPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Parsed publish endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishTarget {
    pub host: String,
    pub port: u16,
    pub app: String,
    pub stream_key: String,
}

impl PublishTarget {
    /// Split an `rtmp://host[:port]/app/key` publish URL.
    pub fn parse(publish_url: &str) -> TransportResult<Self> {
        if !publish_url.starts_with("rtmp://") {
            return Err(TransportError::InvalidUrl(
                "URL must start with rtmp://".to_string(),
            ));
        }
        let parsed =
            Url::parse(publish_url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl("missing host".to_string()))?
            .to_string();
        let port = parsed.port().unwrap_or(1935);

        let path = parsed.path().trim_matches('/');
        let (app, stream_key) = match path.rsplit_once('/') {
            Some((app, key)) if !app.is_empty() && !key.is_empty() => {
                (app.to_string(), key.to_string())
            }
            _ => {
                return Err(TransportError::InvalidUrl(
                    "missing application name or stream key in URL path".to_string(),
                ))
            }
        };

        Ok(Self {
            host,
            port,
            app,
            stream_key,
        })
    }
}

/// An RTMP publish session with blocking operations.
///
/// The protocol plumbing is async internally (`rml_rtmp` over a tokio TCP
/// stream); the engine drives the sink from its single pacing thread, so
/// every method blocks on the sink's own runtime.
pub struct RtmpSink {
    runtime: Runtime,
    conn: Option<Connection>,
    stream_kinds: Vec<StreamKind>,
    header_written: bool,
}

struct Connection {
    stream: TcpStream,
    session: ClientSession,
}

impl RtmpSink {
    /// Establish a publish session: TCP connect, RTMP handshake,
    /// connection request, publish request.
    pub fn dial(publish_url: &str) -> TransportResult<Self> {
        let target = PublishTarget::parse(publish_url)?;
        let runtime = Runtime::new().map_err(TransportError::Io)?;
        let conn = runtime.block_on(establish(&target)).map_err(|e| match e {
            TransportError::ConnectFailed(_) => e,
            other => TransportError::ConnectFailed(other.to_string()),
        })?;

        info!(
            host = %target.host,
            port = target.port,
            app = %target.app,
            "RTMP publish session established"
        );
        Ok(Self {
            runtime,
            conn: Some(conn),
            stream_kinds: Vec::new(),
            header_written: false,
        })
    }

    /// Publish the stream metadata. Must be called exactly once per dial,
    /// before any packet.
    pub fn write_header(&mut self, streams: &[StreamInfo]) -> TransportResult<()> {
        if self.header_written {
            return Err(TransportError::HeaderAlreadyWritten);
        }
        let conn = self.conn.as_mut().ok_or(TransportError::NotConnected)?;

        let metadata = build_metadata(streams);
        let result = conn
            .session
            .publish_metadata(&metadata)
            .map_err(|e| TransportError::HandshakeFailed(format!("metadata publish failed: {e:?}")))?;
        if let ClientSessionResult::OutboundResponse(packet) = result {
            self.runtime
                .block_on(conn.stream.write_all(&packet.bytes))
                .map_err(|e| TransportError::HandshakeFailed(e.to_string()))?;
        }

        self.stream_kinds = streams.iter().map(|s| s.kind.clone()).collect();
        self.header_written = true;
        debug!("stream header published");
        Ok(())
    }

    /// Send one packet immediately. The sink must not be reused after a
    /// write failure.
    pub fn write_packet(&mut self, packet: &MediaPacket) -> TransportResult<()> {
        if !self.header_written {
            return Err(TransportError::HeaderNotWritten);
        }
        let conn = self.conn.as_mut().ok_or(TransportError::NotConnected)?;

        let timestamp = RtmpTimestamp::new(packet.time.as_millis() as u32);
        let is_audio = matches!(
            self.stream_kinds.get(packet.stream_index),
            Some(StreamKind::Audio { .. })
        );
        // Anything that is not audio rides the video channel.
        let result = if is_audio {
            conn.session
                .publish_audio_data(packet.data.clone(), timestamp, false)
        } else {
            conn.session
                .publish_video_data(packet.data.clone(), timestamp, !packet.is_keyframe)
        };
        let session_result =
            result.map_err(|e| TransportError::WriteFailed(format!("publish failed: {e:?}")))?;

        if let ClientSessionResult::OutboundResponse(rtmp_packet) = session_result {
            self.runtime
                .block_on(conn.stream.write_all(&rtmp_packet.bytes))
                .map_err(|e| TransportError::WriteFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Tear down the session. Idempotent.
    pub fn close(&mut self) {
        if self.conn.take().is_some() {
            debug!("RTMP sink closed");
        }
        self.header_written = false;
    }
}

impl Drop for RtmpSink {
    fn drop(&mut self) {
        self.close();
    }
}

async fn establish(target: &PublishTarget) -> TransportResult<Connection> {
    let addr = format!("{}:{}", target.host, target.port);
    debug!(addr = %addr, "connecting");
    let mut stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| TransportError::ConnectFailed(format!("TCP connect failed: {e}")))?;

    let leftover = perform_handshake(&mut stream).await?;

    let config = ClientSessionConfig::new();
    let (mut session, initial_results) = ClientSession::new(config)
        .map_err(|e| TransportError::ConnectFailed(format!("session creation failed: {e:?}")))?;
    for result in initial_results {
        if let ClientSessionResult::OutboundResponse(packet) = result {
            stream.write_all(&packet.bytes).await?;
        }
    }
    if !leftover.is_empty() {
        let _ = session.handle_input(&leftover);
    }

    debug!(app = %target.app, "requesting RTMP connection");
    let connect_result = session
        .request_connection(target.app.clone())
        .map_err(|e| TransportError::ConnectFailed(format!("connection request failed: {e:?}")))?;
    if let ClientSessionResult::OutboundResponse(packet) = connect_result {
        stream.write_all(&packet.bytes).await?;
    }
    await_session_event(&mut stream, &mut session, |event| match event {
        ClientSessionEvent::ConnectionRequestAccepted => Some(Ok(())),
        ClientSessionEvent::ConnectionRequestRejected { description } => Some(Err(
            TransportError::ConnectFailed(format!("connection rejected: {description}")),
        )),
        _ => None,
    })
    .await?;

    debug!(stream_key = %target.stream_key, "requesting publish");
    let publish_result = session
        .request_publishing(target.stream_key.clone(), PublishRequestType::Live)
        .map_err(|e| TransportError::ConnectFailed(format!("publish request failed: {e:?}")))?;
    if let ClientSessionResult::OutboundResponse(packet) = publish_result {
        stream.write_all(&packet.bytes).await?;
    }
    await_session_event(&mut stream, &mut session, |event| match event {
        ClientSessionEvent::PublishRequestAccepted => Some(Ok(())),
        _ => None,
    })
    .await?;

    Ok(Connection { stream, session })
}

async fn perform_handshake(stream: &mut TcpStream) -> TransportResult<Vec<u8>> {
    let mut handshake = Handshake::new(PeerType::Client);

    let p0_p1 = handshake
        .generate_outbound_p0_and_p1()
        .map_err(|e| TransportError::ConnectFailed(format!("handshake generation failed: {e:?}")))?;
    stream.write_all(&p0_p1).await?;

    let mut buf = vec![0u8; 4096];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            return Err(TransportError::ConnectFailed(
                "connection closed during handshake".to_string(),
            ));
        }
        match handshake.process_bytes(&buf[..n]) {
            Ok(HandshakeProcessResult::InProgress { response_bytes }) => {
                if !response_bytes.is_empty() {
                    stream.write_all(&response_bytes).await?;
                }
            }
            Ok(HandshakeProcessResult::Completed {
                response_bytes,
                remaining_bytes,
            }) => {
                if !response_bytes.is_empty() {
                    stream.write_all(&response_bytes).await?;
                }
                return Ok(remaining_bytes);
            }
            Err(e) => {
                return Err(TransportError::ConnectFailed(format!(
                    "handshake failed: {e:?}"
                )));
            }
        }
    }
}

/// Pump the session until `check` resolves an awaited event, answering
/// any outbound protocol messages along the way.
async fn await_session_event<T>(
    stream: &mut TcpStream,
    session: &mut ClientSession,
    mut check: impl FnMut(ClientSessionEvent) -> Option<TransportResult<T>>,
) -> TransportResult<T> {
    let deadline = tokio::time::Instant::now() + ACCEPT_TIMEOUT;
    let mut buf = vec![0u8; 4096];
    loop {
        let n = tokio::time::timeout_at(deadline, stream.read(&mut buf))
            .await
            .map_err(|_| {
                TransportError::ConnectFailed("timed out waiting for server response".to_string())
            })??;
        if n == 0 {
            return Err(TransportError::ConnectFailed(
                "connection closed".to_string(),
            ));
        }

        let results = session
            .handle_input(&buf[..n])
            .map_err(|e| TransportError::ConnectFailed(format!("session input error: {e:?}")))?;
        for result in results {
            match result {
                ClientSessionResult::OutboundResponse(packet) => {
                    stream.write_all(&packet.bytes).await?;
                }
                ClientSessionResult::RaisedEvent(event) => {
                    if let Some(outcome) = check(event) {
                        return outcome;
                    }
                }
                other => trace!("unhandled session result: {:?}", other),
            }
        }
    }
}

fn build_metadata(streams: &[StreamInfo]) -> StreamMetadata {
    let mut metadata = StreamMetadata::new();
    for stream in streams {
        match stream.kind {
            StreamKind::Video { width, height } => {
                metadata.video_width = Some(width);
                metadata.video_height = Some(height);
            }
            StreamKind::Audio {
                sample_rate,
                channels,
            } => {
                metadata.audio_sample_rate = Some(sample_rate);
                metadata.audio_channels = Some(u32::from(channels));
                metadata.audio_is_stereo = Some(channels == 2);
            }
            StreamKind::Other => {}
        }
    }
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_publish_url() {
        let target = PublishTarget::parse("rtmp://live.example.com/input/abc123").unwrap();
        assert_eq!(target.host, "live.example.com");
        assert_eq!(target.port, 1935);
        assert_eq!(target.app, "input");
        assert_eq!(target.stream_key, "abc123");
    }

    #[test]
    fn test_parse_publish_url_with_port() {
        let target = PublishTarget::parse("rtmp://10.0.0.1:1936/live/key").unwrap();
        assert_eq!(target.port, 1936);
        assert_eq!(target.app, "live");
    }

    #[test]
    fn test_parse_rejects_non_rtmp_scheme() {
        assert!(matches!(
            PublishTarget::parse("http://example.com/live/key"),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_parse_rejects_missing_stream_key() {
        assert!(matches!(
            PublishTarget::parse("rtmp://example.com/live"),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_metadata_from_streams() {
        let streams = vec![
            StreamInfo {
                index: 0,
                kind: StreamKind::Video {
                    width: 1280,
                    height: 720,
                },
            },
            StreamInfo {
                index: 1,
                kind: StreamKind::Audio {
                    sample_rate: 44100,
                    channels: 2,
                },
            },
        ];
        let metadata = build_metadata(&streams);
        assert_eq!(metadata.video_width, Some(1280));
        assert_eq!(metadata.video_height, Some(720));
        assert_eq!(metadata.audio_sample_rate, Some(44100));
        assert_eq!(metadata.audio_is_stereo, Some(true));
    }
}
