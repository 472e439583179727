//! Client error types.

use thiserror::Error;

/// Failure of a single exchange on one transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] async_tungstenite::tungstenite::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Unexpected HTTP status {0}")]
    Status(u16),

    #[error("Connection closed")]
    Closed,

    #[error("Aborted")]
    Aborted,

    #[error("No reply within {0:?}")]
    TimedOut(std::time::Duration),
}

/// Errors surfaced by the transport negotiator.
#[derive(Debug, Error)]
pub enum NegotiatorError {
    #[error("Every transport failed to handshake")]
    TransportsExhausted,

    #[error("Handshake refused: {0}")]
    HandshakeRefused(String),

    #[error("Request refused: {0}")]
    Refused(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Client disconnected")]
    Closed,

    #[error("No transports configured")]
    NoTransports,

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}
