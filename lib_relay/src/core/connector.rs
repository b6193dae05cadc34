//! # Upstream Connector
//!
//! The task that owns the upstream session. It asks the `UpstreamManager`
//! whether a connect may start, opens the transport, sends the subscription,
//! and turns every inbound frame, error or close into an `UpstreamEvent`.
//! Reconnects arrive as `ConnectorCommand::Connect` from the supervisor.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;

use crate::core::dispatcher::Dispatcher;
use crate::core::reconnect::ReconnectSupervisor;
use crate::core::subscription::SubscriptionFilter;
use crate::core::transport::{UpstreamSession, UpstreamTransport};
use crate::core::upstream_manager::{ConnectionState, Directive, UpstreamEvent, UpstreamManager};
use crate::error::RelayError;

/// Upper bound on one connect attempt, handshake included.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Requests accepted by the connector task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorCommand {
    /// Attempt a new upstream connection.
    Connect,
}

/// Whether the run loop keeps going after a session ends.
enum Flow {
    Continue,
    Shutdown,
}

/// # Upstream Connector
pub struct UpstreamConnector {
    url: String,
    transport: Arc<dyn UpstreamTransport>,
    connect_timeout: Duration,
    manager: UpstreamManager,
    commands: mpsc::UnboundedReceiver<ConnectorCommand>,
}

impl UpstreamConnector {
    /// Wires a connector, its state machine and its reconnect supervisor.
    pub fn new(
        url: impl Into<String>,
        transport: Arc<dyn UpstreamTransport>,
        filter: Arc<SubscriptionFilter>,
        credential: Option<String>,
        dispatcher: Arc<Dispatcher>,
        reconnect_delay: Duration,
    ) -> Self {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let supervisor = ReconnectSupervisor::new(reconnect_delay, command_tx);
        Self {
            url: url.into(),
            transport,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            manager: UpstreamManager::new(filter, credential, dispatcher, supervisor),
            commands,
        }
    }

    /// Replaces the default bound on a single connect attempt.
    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// A handle to the reconnect supervisor, for observation.
    pub fn supervisor(&self) -> ReconnectSupervisor {
        self.manager.supervisor().clone()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.manager.state()
    }

    /// # Run
    ///
    /// Connects immediately, then serves reconnect requests until `shutdown`
    /// fires. Upstream failures never end this loop.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        if let Flow::Shutdown = self.connect_once(&mut shutdown).await {
            return;
        }

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    log::info!("Upstream connector shutting down.");
                    break;
                }
                command = self.commands.recv() => match command {
                    Some(ConnectorCommand::Connect) => {
                        if let Flow::Shutdown = self.connect_once(&mut shutdown).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    /// One connection attempt, and the whole session if it opens.
    async fn connect_once(&mut self, shutdown: &mut broadcast::Receiver<()>) -> Flow {
        match self.manager.begin_connect() {
            Ok(true) => {}
            Ok(false) => return Flow::Continue,
            Err(e) => {
                log::debug!("Upstream connect skipped: {}", e);
                return Flow::Continue;
            }
        }

        log::info!("Connecting to upstream: {}", self.url);
        let attempt = tokio::select! {
            _ = shutdown.recv() => {
                log::info!("Upstream shutting down during connect.");
                return Flow::Shutdown;
            }
            attempt = timeout(self.connect_timeout, self.transport.connect(&self.url)) => attempt,
        };
        let connected = attempt.unwrap_or_else(|_| {
            Err(RelayError::Connect(format!(
                "no handshake within {}ms",
                self.connect_timeout.as_millis()
            )))
        });

        let mut session = match connected {
            Ok(session) => session,
            Err(e) => {
                // No transport to close; report the failure and the close together.
                self.manager.handle_event(UpstreamEvent::Failed(e.to_string()));
                self.manager.handle_event(UpstreamEvent::Closed);
                return Flow::Continue;
            }
        };

        let directive = self.manager.handle_event(UpstreamEvent::Opened);
        self.apply(directive, session.as_mut()).await;

        while self.manager.state() == ConnectionState::Open {
            tokio::select! {
                _ = shutdown.recv() => {
                    log::info!("Upstream shutting down...");
                    session.close().await;
                    return Flow::Shutdown;
                }
                inbound = session.recv() => {
                    let event = match inbound {
                        Some(Ok(text)) => UpstreamEvent::Message(text),
                        Some(Err(e)) => UpstreamEvent::Failed(e.to_string()),
                        None => UpstreamEvent::Closed,
                    };
                    let directive = self.manager.handle_event(event);
                    self.apply(directive, session.as_mut()).await;
                }
            }
        }
        Flow::Continue
    }

    /// Carries out directives until the state machine has nothing left to ask.
    async fn apply(&mut self, mut directive: Directive, session: &mut dyn UpstreamSession) {
        loop {
            directive = match directive {
                Directive::Idle => return,
                Directive::Subscribe(payloads) => match send_all(session, payloads).await {
                    Ok(()) => Directive::Idle,
                    Err(e) => self.manager.handle_event(UpstreamEvent::Failed(e.to_string())),
                },
                Directive::CloseTransport => {
                    session.close().await;
                    self.manager.handle_event(UpstreamEvent::Closed)
                }
            };
        }
    }
}

async fn send_all(session: &mut dyn UpstreamSession, payloads: Vec<String>) -> Result<(), RelayError> {
    for payload in payloads {
        log::debug!("Sending upstream: {} bytes", payload.len());
        session.send_text(payload).await?;
    }
    Ok(())
}
