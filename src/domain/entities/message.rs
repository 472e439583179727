//! Bayeux message record.
//!
//! The core treats messages as opaque records; only the fields the
//! lifecycle machinery reads are typed, payloads stay `serde_json::Value`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::value_objects::Advice;

/// Meta channel names.
pub mod channels {
    pub const META_HANDSHAKE: &str = "/meta/handshake";
    pub const META_CONNECT: &str = "/meta/connect";
    pub const META_DISCONNECT: &str = "/meta/disconnect";
    pub const META_SUBSCRIBE: &str = "/meta/subscribe";
    pub const META_UNSUBSCRIBE: &str = "/meta/unsubscribe";

    pub const META_PREFIX: &str = "/meta/";
    pub const SERVICE_PREFIX: &str = "/service/";
}

/// Protocol version advertised in handshake replies.
pub const BAYEUX_VERSION: &str = "1.0";

/// Connection type names.
pub mod connection_types {
    pub const WEBSOCKET: &str = "websocket";
    pub const LONG_POLLING: &str = "long-polling";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub channel: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub successful: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub advice: Option<Advice>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_connection_types: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,
}

impl Message {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            ..Self::default()
        }
    }

    /// A data message for delivery on `channel`.
    pub fn publish(channel: impl Into<String>, data: Value) -> Self {
        Self {
            channel: channel.into(),
            data: Some(data),
            ..Self::default()
        }
    }

    /// Start a reply to `self`: same channel, id and client id.
    pub fn reply(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            id: self.id.clone(),
            client_id: self.client_id.clone(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_advice(mut self, advice: Advice) -> Self {
        self.advice = Some(advice);
        self
    }

    pub fn is_meta(&self) -> bool {
        self.channel.starts_with(channels::META_PREFIX)
    }

    pub fn is_service(&self) -> bool {
        self.channel.starts_with(channels::SERVICE_PREFIX)
    }

    /// Replies carry `successful`; deliveries never do.
    pub fn is_reply(&self) -> bool {
        self.successful.is_some()
    }

    pub fn is_successful(&self) -> bool {
        self.successful == Some(true)
    }
}

/// Request body shape: Bayeux allows a single message or an array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageBatch {
    Many(Vec<Message>),
    One(Box<Message>),
}

impl MessageBatch {
    pub fn into_vec(self) -> Vec<Message> {
        match self {
            MessageBatch::Many(messages) => messages,
            MessageBatch::One(message) => vec![*message],
        }
    }
}
