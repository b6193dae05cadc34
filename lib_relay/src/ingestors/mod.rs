//! # Data Ingestors Module
//!
//! Concrete upstream transports. Each submodule implements the
//! `core::transport` traits for one data source so the connector can drive it
//! without knowing the wire details.
//!
//! ## Contained Modules:
//! - **`aisstream_wss`**: the AISStream WebSocket client (tokio-tungstenite, TLS via rustls).

/// The WebSocket client for the AISStream live feed.
pub mod aisstream_wss;

// --- Public API Re-exports ---
pub use aisstream_wss::{AISSTREAM_URL, AisStreamTransport};
