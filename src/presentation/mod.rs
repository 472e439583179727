//! Presentation Layer
//!
//! HTTP routes and the two Bayeux transports.

pub mod http;
pub mod middleware;
pub mod websocket;
