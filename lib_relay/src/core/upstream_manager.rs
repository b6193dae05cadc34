//! # Upstream Manager
//!
//! The connection state machine. It owns the lifecycle state, the subscription
//! filter and credential, and the handles to the dispatcher and the reconnect
//! supervisor. Transitions are driven by discrete `UpstreamEvent` values, and
//! the side effects that need the transport come back as a `Directive` for the
//! connector to carry out.
//!
//! `Disconnected -> Connecting -> Open -> (Failed) -> Disconnected`

use std::sync::Arc;

use crate::core::dispatcher::Dispatcher;
use crate::core::reconnect::ReconnectSupervisor;
use crate::core::subscription::SubscriptionFilter;
use crate::error::RelayError;

/// Lifecycle states of the upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport exists.
    Disconnected,
    /// A transport is being opened.
    Connecting,
    /// The transport is open and the subscription has been sent.
    Open,
    /// The transport reported an error and is being torn down.
    Failed,
}

/// Events reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// The transport finished its handshake.
    Opened,
    /// A text frame arrived.
    Message(String),
    /// The transport is closed, by the peer or by us.
    Closed,
    /// The transport failed, while connecting or while open.
    Failed(String),
}

/// Work the connector must do on the transport after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Nothing to do.
    Idle,
    /// Send these subscription payloads, in order.
    Subscribe(Vec<String>),
    /// Close the transport and report `UpstreamEvent::Closed`.
    CloseTransport,
}

/// # Upstream Manager
pub struct UpstreamManager {
    state: ConnectionState,
    filter: Arc<SubscriptionFilter>,
    credential: Option<String>,
    dispatcher: Arc<Dispatcher>,
    supervisor: ReconnectSupervisor,
}

impl UpstreamManager {
    /// Creates a manager in the `Disconnected` state.
    pub fn new(
        filter: Arc<SubscriptionFilter>,
        credential: Option<String>,
        dispatcher: Arc<Dispatcher>,
        supervisor: ReconnectSupervisor,
    ) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            filter,
            credential,
            dispatcher,
            supervisor,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The supervisor this manager notifies on disconnects.
    pub fn supervisor(&self) -> &ReconnectSupervisor {
        &self.supervisor
    }

    /// # Begin Connect
    ///
    /// Validates the preconditions of a connect attempt and moves to
    /// `Connecting`. Returns `Ok(false)` when a transport already exists.
    ///
    /// A missing credential ends this attempt with `MissingCredential` and does
    /// not schedule a retry.
    pub fn begin_connect(&mut self) -> Result<bool, RelayError> {
        if self.credential().is_none() {
            log::error!("AISSTREAM_API_KEY is not set. Upstream connection not attempted.");
            return Err(RelayError::MissingCredential);
        }
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open => {
                log::debug!("Connect requested while {:?}. Ignoring.", self.state);
                Ok(false)
            }
            ConnectionState::Disconnected | ConnectionState::Failed => {
                self.state = ConnectionState::Connecting;
                Ok(true)
            }
        }
    }

    /// # Handle Event
    ///
    /// Applies one transport event and returns what the connector must do next.
    pub fn handle_event(&mut self, event: UpstreamEvent) -> Directive {
        match event {
            UpstreamEvent::Opened => self.on_opened(),
            UpstreamEvent::Message(text) => {
                if self.state == ConnectionState::Open {
                    self.dispatcher.deliver(text);
                } else {
                    log::debug!("Dropping upstream frame received while {:?}", self.state);
                }
                Directive::Idle
            }
            UpstreamEvent::Failed(reason) => {
                log::error!("Upstream error: {}", reason);
                self.state = ConnectionState::Failed;
                self.supervisor.on_disconnected();
                Directive::CloseTransport
            }
            UpstreamEvent::Closed => {
                if self.state != ConnectionState::Disconnected {
                    log::warn!("Upstream connection closed.");
                }
                self.state = ConnectionState::Disconnected;
                self.supervisor.on_disconnected();
                Directive::Idle
            }
        }
    }

    fn on_opened(&mut self) -> Directive {
        if self.state != ConnectionState::Connecting {
            log::warn!("Transport opened while {:?}. Closing it.", self.state);
            return Directive::CloseTransport;
        }
        let Some(credential) = self.credential() else {
            return Directive::CloseTransport;
        };
        match self.filter.subscription_payloads(credential) {
            Ok(payloads) => {
                self.state = ConnectionState::Open;
                log::info!("Upstream connection open. Sending {} subscription payload(s).", payloads.len());
                Directive::Subscribe(payloads)
            }
            Err(e) => self.handle_event(UpstreamEvent::Failed(e.to_string())),
        }
    }

    fn credential(&self) -> Option<&str> {
        self.credential.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connector::ConnectorCommand;
    use crate::core::registry::Registry;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Harness {
        manager: UpstreamManager,
        registry: Arc<Registry>,
        commands: mpsc::UnboundedReceiver<ConnectorCommand>,
    }

    fn harness(credential: Option<&str>) -> Harness {
        let registry = Arc::new(Registry::new());
        let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&registry)));
        let (tx, commands) = mpsc::unbounded_channel();
        let supervisor = ReconnectSupervisor::new(Duration::from_secs(3), tx);
        let manager = UpstreamManager::new(
            Arc::new(SubscriptionFilter::default()),
            credential.map(str::to_string),
            dispatcher,
            supervisor,
        );
        Harness { manager, registry, commands }
    }

    #[tokio::test]
    async fn test_missing_credential_blocks_connect() {
        let mut h = harness(None);
        assert!(matches!(h.manager.begin_connect(), Err(RelayError::MissingCredential)));
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(h.manager.supervisor().timers_started(), 0);

        let mut blank = harness(Some("   "));
        assert!(matches!(blank.manager.begin_connect(), Err(RelayError::MissingCredential)));
    }

    #[tokio::test]
    async fn test_open_sends_both_payloads() {
        let mut h = harness(Some("key"));
        assert!(h.manager.begin_connect().unwrap());
        assert_eq!(h.manager.state(), ConnectionState::Connecting);
        assert!(!h.manager.begin_connect().unwrap());

        match h.manager.handle_event(UpstreamEvent::Opened) {
            Directive::Subscribe(payloads) => {
                assert_eq!(payloads.len(), 2);
                assert!(payloads[0].contains("\"APIKey\":\"key\""));
                assert!(payloads[1].contains("\"Apikey\":\"key\""));
            }
            other => panic!("unexpected directive {:?}", other),
        }
        assert_eq!(h.manager.state(), ConnectionState::Open);
    }

    #[tokio::test]
    async fn test_messages_forwarded_only_while_open() {
        let mut h = harness(Some("key"));
        let (_, mut rx) = h.registry.register();
        rx.try_recv().unwrap();

        h.manager.handle_event(UpstreamEvent::Message("early".into()));
        assert!(rx.try_recv().is_err());

        h.manager.begin_connect().unwrap();
        h.manager.handle_event(UpstreamEvent::Opened);
        h.manager.handle_event(UpstreamEvent::Message("{\"MessageType\":\"PositionReport\"}".into()));
        assert_eq!(&*rx.try_recv().unwrap(), "{\"MessageType\":\"PositionReport\"}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_then_error_schedules_single_reconnect() {
        let mut h = harness(Some("key"));
        h.manager.begin_connect().unwrap();
        h.manager.handle_event(UpstreamEvent::Opened);

        assert_eq!(h.manager.handle_event(UpstreamEvent::Closed), Directive::Idle);
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);
        assert_eq!(h.manager.handle_event(UpstreamEvent::Failed("reset".into())), Directive::CloseTransport);
        assert_eq!(h.manager.handle_event(UpstreamEvent::Closed), Directive::Idle);

        assert_eq!(h.manager.supervisor().timers_started(), 1);
        assert!(h.commands.recv().await.is_some());
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(h.commands.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_then_close_schedules_single_reconnect() {
        let mut h = harness(Some("key"));
        h.manager.begin_connect().unwrap();
        h.manager.handle_event(UpstreamEvent::Opened);

        assert_eq!(h.manager.handle_event(UpstreamEvent::Failed("timeout".into())), Directive::CloseTransport);
        assert_eq!(h.manager.state(), ConnectionState::Failed);
        h.manager.handle_event(UpstreamEvent::Closed);
        assert_eq!(h.manager.state(), ConnectionState::Disconnected);

        assert_eq!(h.manager.supervisor().timers_started(), 1);
        assert!(h.commands.recv().await.is_some());
        assert!(h.commands.try_recv().is_err());
    }
}
