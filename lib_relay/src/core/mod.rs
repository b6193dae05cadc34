//! # Core Engine Module
//!
//! The relay's moving parts, all independent of any concrete network stack:
//!
//! - **`subscription`**: the immutable filter sent upstream on every connect.
//! - **`registry`**: the live set of downstream subscribers and their greeting.
//! - **`dispatcher`**: the broadcast router. One upstream message in, one copy
//!   out per open subscriber. A broken subscriber is dropped without affecting
//!   the others.
//! - **`reconnect`**: the single-flight, fixed-delay reconnect supervisor.
//! - **`upstream_manager`**: the explicit connection state machine, driven by
//!   discrete `UpstreamEvent` values.
//! - **`transport`**: the traits an upstream transport implements.
//! - **`connector`**: the task that owns the upstream session and feeds its
//!   events to the state machine.

/// The broadcast router.
pub mod dispatcher;
/// Drives one upstream session at a time through the state machine.
pub mod connector;
/// Single-flight reconnect scheduling.
pub mod reconnect;
/// Downstream subscriber bookkeeping.
pub mod registry;
/// Filter and payload construction for the upstream subscription.
pub mod subscription;
/// Transport abstraction for the upstream connection.
pub mod transport;
/// The connection state machine.
pub mod upstream_manager;

// --- Public API Re-exports ---
pub use connector::{ConnectorCommand, DEFAULT_CONNECT_TIMEOUT, UpstreamConnector};
pub use dispatcher::{DeliveryReport, Dispatcher};
pub use reconnect::{DEFAULT_RECONNECT_DELAY, ReconnectSupervisor};
pub use registry::{ReadyState, Registry, SubscriberId};
pub use subscription::{BoundingBox, SubscriptionFilter};
pub use transport::{UpstreamSession, UpstreamTransport};
pub use upstream_manager::{ConnectionState, Directive, UpstreamEvent, UpstreamManager};
