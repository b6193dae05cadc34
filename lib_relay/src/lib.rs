//! # lib_relay
//!
//! The relay engine behind the `server_ais` gateway. It keeps a single upstream
//! WebSocket session alive, subscribes to a filtered slice of the feed and copies
//! every upstream message, byte for byte, to all connected downstream clients.
//!
//! ## Layout:
//! - **`core`**: network-agnostic pieces. The connection state machine, the
//!   reconnect supervisor, the subscriber registry and the broadcast dispatcher.
//! - **`ingestors`**: concrete upstream transports (the AISStream WebSocket client).
//! - **`error`**: the crate-wide `RelayError`.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

/// Connector state machine, reconnect policy, registry and fan-out.
pub mod core;
/// Error type shared by every relay component.
pub mod error;
/// Concrete upstream transports.
#[cfg(feature = "ingestors")]
pub mod ingestors;

pub use error::RelayError;
