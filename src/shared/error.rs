//! Application Error Types
//!
//! Centralized error handling with Axum integration.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Server-side error type
#[derive(Debug, thiserror::Error)]
pub enum BayeuxError {
    /// A request that breaks the protocol (e.g. a connect before handshake).
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The session id is unknown or has expired.
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    /// A second connect arrived while one is still suspended.
    #[error("Concurrent connect for session {0}")]
    ConcurrentConnect(String),

    /// The session exists but is not connected.
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Both the timer and the message path claimed the same pending connect.
    #[error("Scheduler invariant violated for session {0}")]
    SchedulerRace(String),

    #[error("Malformed message: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BayeuxError {
    /// Errors the client recovers from by handshaking again.
    pub fn requires_handshake(&self) -> bool {
        matches!(
            self,
            BayeuxError::ProtocolViolation(_)
                | BayeuxError::UnknownSession(_)
                | BayeuxError::ConcurrentConnect(_)
                | BayeuxError::InvalidState(_)
        )
    }

    /// Bayeux error string (`code:args:message`) carried in failed replies.
    pub fn bayeux_error(&self) -> String {
        match self {
            BayeuxError::UnknownSession(id) => format!("402:{}:unknown_session", id),
            BayeuxError::ConcurrentConnect(id) => format!("409:{}:concurrent_connect", id),
            BayeuxError::InvalidState(id) => format!("402:{}:session_not_connected", id),
            BayeuxError::ProtocolViolation(msg) => format!("400::{}", msg),
            BayeuxError::Codec(_) => "400::malformed_message".to_string(),
            BayeuxError::SchedulerRace(_) | BayeuxError::Internal(_) => {
                "500::internal_error".to_string()
            }
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

impl IntoResponse for BayeuxError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            BayeuxError::Codec(e) => (StatusCode::BAD_REQUEST, 10002, e.to_string()),
            BayeuxError::ProtocolViolation(msg) => (StatusCode::BAD_REQUEST, 10002, msg.clone()),
            BayeuxError::UnknownSession(_)
            | BayeuxError::ConcurrentConnect(_)
            | BayeuxError::InvalidState(_) => (StatusCode::CONFLICT, 10005, self.to_string()),
            BayeuxError::SchedulerRace(id) => {
                tracing::error!(session_id = %id, "Scheduler invariant violated");
                (StatusCode::INTERNAL_SERVER_ERROR, 10000, "Internal server error".into())
            }
            BayeuxError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, 10000, "Internal server error".into())
            }
        };

        (status, Json(ErrorResponse { code, message })).into_response()
    }
}
