//! Common Test Utilities
//!
//! Shared helpers, fixtures, and test infrastructure.

#![allow(dead_code)]

mod local_transport;

pub use local_transport::LocalTransport;

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request},
    response::Response,
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use bayeux_server::application::services::{BayeuxServer, BayeuxService, TransportContext};
use bayeux_server::config::Settings;
use bayeux_server::domain::entities::{channels, connection_types, Message};
use bayeux_server::startup::{build_router, AppState};

/// Settings with short timeouts so virtual-time tests stay readable
pub fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.bayeux.timeout_ms = 2_000;
    settings.bayeux.max_interval_ms = 10_000;
    settings
}

/// Test application driving the real router in-process
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_settings(settings: Settings) -> Self {
        let state = AppState::new(settings);
        let router = build_router(state.clone());
        Self { router, state }
    }

    pub fn server(&self) -> &Arc<BayeuxServer> {
        &self.state.server
    }

    /// Make a GET request to the application
    pub async fn get(&self, uri: &str) -> Response {
        self.router
            .clone()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    /// POST a Bayeux batch to the long-polling endpoint
    pub async fn post_bayeux(&self, body: &str, cookie: Option<&str>) -> Response {
        let mut request = Request::builder()
            .method("POST")
            .uri("/cometd")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        self.router
            .clone()
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap()
    }
}

/// Read a response body as JSON
pub async fn body_json(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// Read a response body as text
pub async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// `name=value` of the browser cookie set by a response, if any
pub fn browser_cookie(response: &Response) -> Option<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|v| v.starts_with("BAYEUX_BROWSER="))
        .and_then(|v| v.split(';').next())
        .map(str::to_string)
}

pub fn server_with(settings: Settings) -> Arc<BayeuxServer> {
    Arc::new(BayeuxServer::new(settings))
}

pub async fn handshake(server: &BayeuxServer, ctx: &TransportContext) -> String {
    let replies = server
        .handle(vec![Message::new(channels::META_HANDSHAKE)], ctx)
        .await;
    replies[0].client_id.clone().unwrap()
}

pub fn connect(client_id: &str) -> Message {
    let mut message = Message::new(channels::META_CONNECT).with_client_id(client_id);
    message.connection_type = Some(connection_types::LONG_POLLING.to_string());
    message
}

pub async fn subscribe(server: &BayeuxServer, ctx: &TransportContext, client_id: &str, channel: &str) {
    let mut message = Message::new(channels::META_SUBSCRIBE).with_client_id(client_id);
    message.subscription = Some(channel.to_string());
    let replies = server.handle(vec![message], ctx).await;
    assert!(replies[0].is_successful());
}

/// The `/meta/connect` reply out of a reply batch
pub fn connect_reply(replies: &[Message]) -> &Message {
    replies
        .iter()
        .find(|m| m.channel == channels::META_CONNECT)
        .unwrap()
}
