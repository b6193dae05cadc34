//! Server-side wiring for the AIS relay: configuration, logging and the HTTP/WebSocket surface.

pub mod ais_logic;
