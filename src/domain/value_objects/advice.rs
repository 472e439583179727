//! Reconnect advice attached to connect replies.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What the client should do after reading a reply.
///
/// Variants are ordered by restrictiveness: `Retry < Handshake < None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reconnect {
    /// Issue the next connect after `interval`
    #[default]
    Retry,
    /// The session is gone; handshake again
    Handshake,
    /// Stop reconnecting
    None,
}

impl Reconnect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Reconnect::Retry => "retry",
            Reconnect::Handshake => "handshake",
            Reconnect::None => "none",
        }
    }
}

impl std::fmt::Display for Reconnect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bayeux advice object.
///
/// Servers always fill `interval` and `timeout`; clients may send a bare
/// `{"timeout": 0}` on their connect to ask for an immediate reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Advice {
    pub reconnect: Reconnect,

    /// Milliseconds to wait before the next connect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,

    /// Milliseconds the next connect may stay suspended
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Set when the reply was shaped by the browser throttle
    #[serde(rename = "multiple-clients", skip_serializing_if = "std::ops::Not::not")]
    pub multiple_clients: bool,
}

impl Advice {
    pub fn new(reconnect: Reconnect, interval: Duration, timeout: Duration) -> Self {
        Self {
            reconnect,
            interval: Some(interval.as_millis() as u64),
            timeout: Some(timeout.as_millis() as u64),
            multiple_clients: false,
        }
    }

    /// Advice a client attaches to a connect to bound its suspension.
    pub fn requesting_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout.as_millis() as u64),
            ..Self::default()
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval.unwrap_or(0))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }

    pub fn is_terminal(&self) -> bool {
        self.reconnect == Reconnect::None
    }
}
