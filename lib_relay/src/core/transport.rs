use async_trait::async_trait;

use crate::error::RelayError;

/// # Upstream Transport
///
/// Opens sessions to the upstream endpoint. The production implementation is
/// `ingestors::AisStreamTransport`; tests substitute scripted sessions.
#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    /// Opens a new session. Resolves once the handshake has completed.
    async fn connect(&self, url: &str) -> Result<Box<dyn UpstreamSession>, RelayError>;
}

/// # Upstream Session
///
/// One live connection. Dropped and replaced on every reconnect.
#[async_trait]
pub trait UpstreamSession: Send {
    /// Sends a text frame.
    async fn send_text(&mut self, text: String) -> Result<(), RelayError>;

    /// Waits for the next inbound message as text. `None` means the stream is
    /// closed.
    async fn recv(&mut self) -> Option<Result<String, RelayError>>;

    /// Closes the session. Calling it on a closed session does nothing.
    async fn close(&mut self);
}
