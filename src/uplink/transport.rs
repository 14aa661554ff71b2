//! Transport abstraction for the transcription uplink.
//!
//! The backend speaks WebSocket: outbound frames are raw binary audio,
//! inbound frames are JSON text. The traits here keep the uplink state
//! machine independent of the wire so it can be exercised with an
//! in-memory transport in tests.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::StreamKind;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("handshake timed out after {0:?}")]
    Timeout(Duration),
    #[error("send failed: {0}")]
    Send(String),
    #[error("connection closed")]
    Closed,
}

/// Outbound half of an open connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_chunk(&mut self, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Best-effort close; errors are swallowed.
    async fn close(&mut self);
}

/// Inbound half of an open connection. Yields text frames until the
/// connection ends; non-text frames are skipped.
#[async_trait]
pub trait FrameStream: Send {
    async fn next_text(&mut self) -> Option<String>;
}

/// Opens one connection per attempt. Implementations must not retry
/// internally; reconnect policy belongs to the uplink.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        kind: StreamKind,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), TransportError>;
}

type WsSocket = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

/// WebSocket connector addressing `{base}/{stream-kind}`.
pub struct WsConnector {
    base_url: String,
    handshake_timeout: Duration,
}

impl WsConnector {
    pub fn new(base_url: impl Into<String>, handshake_timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            handshake_timeout,
        }
    }

    fn endpoint(&self, kind: StreamKind) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), kind.as_str())
    }
}

#[async_trait]
impl TransportConnector for WsConnector {
    async fn connect(
        &self,
        kind: StreamKind,
    ) -> Result<(Box<dyn FrameSink>, Box<dyn FrameStream>), TransportError> {
        let url = self.endpoint(kind);
        debug!("Connecting uplink {} to {}", kind.as_str(), url);

        let handshake = tokio_tungstenite::connect_async(url.as_str());
        let (socket, _response) = tokio::time::timeout(self.handshake_timeout, handshake)
            .await
            .map_err(|_| TransportError::Timeout(self.handshake_timeout))?
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let (sink, stream) = socket.split();
        Ok((
            Box::new(WsFrameSink { sink }),
            Box::new(WsFrameStream { stream }),
        ))
    }
}

struct WsFrameSink {
    sink: futures_util::stream::SplitSink<WsSocket, Message>,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send_chunk(&mut self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.sink
            .send(Message::Binary(payload))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}

struct WsFrameStream {
    stream: futures_util::stream::SplitStream<WsSocket>,
}

#[async_trait]
impl FrameStream for WsFrameStream {
    async fn next_text(&mut self) -> Option<String> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(text),
                Some(Ok(Message::Close(_))) => return None,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("Uplink receive error: {}", e);
                    return None;
                }
                None => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_addressing() {
        let connector = WsConnector::new("ws://127.0.0.1:8765", Duration::from_secs(5));
        assert_eq!(
            connector.endpoint(StreamKind::Microphone),
            "ws://127.0.0.1:8765/mic"
        );
        assert_eq!(
            connector.endpoint(StreamKind::SystemAudio),
            "ws://127.0.0.1:8765/system"
        );
    }

    #[test]
    fn test_endpoint_trailing_slash() {
        let connector = WsConnector::new("ws://127.0.0.1:8765/", Duration::from_secs(5));
        assert_eq!(
            connector.endpoint(StreamKind::Microphone),
            "ws://127.0.0.1:8765/mic"
        );
    }
}
