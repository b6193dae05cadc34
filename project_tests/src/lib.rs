//! # Scripted Upstream
//!
//! A fake upstream transport for end-to-end tests. Each accepted connection
//! hands a `SessionHandle` to the test, which can push frames, inject errors,
//! close the session and inspect what the relay sent upstream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lib_relay::RelayError;
use lib_relay::core::{UpstreamSession, UpstreamTransport};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// What the fake upstream does next on an open session.
#[derive(Debug)]
pub enum Inbound {
    /// Deliver a text frame.
    Text(String),
    /// Report a transport error.
    Error(String),
    /// Close the stream from the peer side.
    Close,
}

/// Test-side control of one accepted session.
pub struct SessionHandle {
    inbound: mpsc::UnboundedSender<Inbound>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn push(&self, text: impl Into<String>) {
        let _ = self.inbound.send(Inbound::Text(text.into()));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self.inbound.send(Inbound::Error(reason.to_string()));
    }

    pub fn close(&self) {
        let _ = self.inbound.send(Inbound::Close);
    }

    /// Frames the relay sent upstream on this session.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Whether the relay closed this session.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct ScriptedSession {
    inbound: mpsc::UnboundedReceiver<Inbound>,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    fail_sends: bool,
}

#[async_trait]
impl UpstreamSession for ScriptedSession {
    async fn send_text(&mut self, text: String) -> Result<(), RelayError> {
        if self.fail_sends {
            return Err(RelayError::Transport("broken pipe".to_string()));
        }
        self.sent.lock().unwrap().push(text);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, RelayError>> {
        match self.inbound.recv().await {
            Some(Inbound::Text(text)) => Some(Ok(text)),
            Some(Inbound::Error(reason)) => Some(Err(RelayError::Transport(reason))),
            Some(Inbound::Close) | None => None,
        }
    }

    async fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inbound.close();
    }
}

/// # Scripted Transport
///
/// Records the time of every connect attempt. Refuses every attempt, stalls
/// every handshake, or accepts and reports each new session on the channel
/// returned by `accepting`.
pub struct ScriptedTransport {
    attempts: Mutex<Vec<Instant>>,
    opened: Option<mpsc::UnboundedSender<SessionHandle>>,
    fail_sends: bool,
    stall: bool,
}

impl ScriptedTransport {
    /// A transport whose every connect attempt fails.
    pub fn refusing() -> Self {
        Self {
            attempts: Mutex::new(Vec::new()),
            opened: None,
            fail_sends: false,
            stall: false,
        }
    }

    /// A transport whose connect attempts never finish the handshake.
    pub fn stalling() -> Self {
        Self {
            stall: true,
            ..Self::refusing()
        }
    }

    /// A transport that accepts every attempt.
    pub fn accepting() -> (Self, mpsc::UnboundedReceiver<SessionHandle>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Self {
            attempts: Mutex::new(Vec::new()),
            opened: Some(tx),
            fail_sends: false,
            stall: false,
        };
        (transport, rx)
    }

    /// Accepts connections but fails every upstream send.
    pub fn with_failing_sends(mut self) -> Self {
        self.fail_sends = true;
        self
    }

    /// Times of every connect attempt so far.
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().clone()
    }
}

#[async_trait]
impl UpstreamTransport for ScriptedTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn UpstreamSession>, RelayError> {
        self.attempts.lock().unwrap().push(Instant::now());
        if self.stall {
            std::future::pending::<()>().await;
        }

        let Some(opened) = &self.opened else {
            return Err(RelayError::Connect(format!("connection refused: {}", url)));
        };

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let _ = opened.send(SessionHandle {
            inbound: inbound_tx,
            sent: Arc::clone(&sent),
            closed: Arc::clone(&closed),
        });

        Ok(Box::new(ScriptedSession {
            inbound: inbound_rx,
            sent,
            closed,
            fail_sends: self.fail_sends,
        }))
    }
}

/// Polls `condition` every 5ms until it holds or `limit` elapses.
pub async fn wait_until(limit: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
