//! WebSocket Transport
//!
//! Bayeux over a persistent socket.

pub mod handler;

pub use handler::ws_handler;
