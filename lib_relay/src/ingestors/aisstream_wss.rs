//! # AISStream WSS Ingestor
//!
//! WebSocket transport for the AISStream live feed. Frames are handed to the
//! connector as text: text frames as-is, binary frames decoded as UTF-8.
//! Ping/Pong are answered by tungstenite and never surface.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message};

use crate::core::transport::{UpstreamSession, UpstreamTransport};
use crate::error::RelayError;

/// The public AISStream endpoint.
pub const AISSTREAM_URL: &str = "wss://stream.aisstream.io/v0/stream";

/// # AISStream Transport
///
/// Stateless; every `connect` opens a fresh WebSocket.
#[derive(Debug, Default, Clone, Copy)]
pub struct AisStreamTransport;

#[async_trait]
impl UpstreamTransport for AisStreamTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn UpstreamSession>, RelayError> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| RelayError::Connect(e.to_string()))?;
        log::info!("Connected to upstream (HTTP {}).", response.status());
        Ok(Box::new(WssSession { stream, closed: false }))
    }
}

struct WssSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl UpstreamSession for WssSession {
    async fn send_text(&mut self, text: String) -> Result<(), RelayError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, RelayError>> {
        if self.closed {
            return None;
        }
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.as_str().to_owned())),
                Some(Ok(Message::Binary(bin))) => {
                    log::trace!("Received binary frame from upstream: {} bytes", bin.len());
                    return Some(Ok(String::from_utf8_lossy(&bin).into_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    log::debug!("Upstream sent close frame: {:?}", frame);
                    self.closed = true;
                    return None;
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Some(Err(RelayError::Transport(e.to_string()))),
                None => {
                    self.closed = true;
                    return None;
                }
            }
        }
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.stream.close(None).await {
            log::debug!("Upstream close handshake failed: {}", e);
        }
    }
}
