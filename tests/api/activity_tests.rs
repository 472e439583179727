//! Inactivity monitor

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use bayeux_server::application::services::{BayeuxService, TransportContext};
use bayeux_server::config::InactivityMode;
use bayeux_server::domain::entities::Message;
use bayeux_server::domain::value_objects::Reconnect;

use crate::common::*;

fn settings(mode: InactivityMode) -> bayeux_server::config::Settings {
    let mut settings = test_settings();
    settings.bayeux.timeout_ms = 2_000;
    settings.activity.max_inactivity_ms = 3_000;
    settings.activity.mode = mode;
    settings
}

async fn cycle(
    server: &bayeux_server::application::services::BayeuxServer,
    ctx: &TransportContext,
    client_id: &str,
) -> Reconnect {
    let replies = server.handle(vec![connect(client_id)], ctx).await;
    connect_reply(&replies).advice.as_ref().unwrap().reconnect
}

#[tokio::test(start_paused = true)]
async fn test_silent_client_is_told_to_stop() {
    let server = server_with(settings(InactivityMode::ClientOnly));
    let ctx = TransportContext::long_polling(None);
    let client_id = handshake(&server, &ctx).await;

    // 0s -> 2s: still within maxInactivity
    assert_eq!(cycle(&server, &ctx, &client_id).await, Reconnect::Retry);
    // 2s -> 4s: silent for longer than 3s
    assert_eq!(cycle(&server, &ctx, &client_id).await, Reconnect::None);

    let session = server
        .sessions()
        .lookup(&client_id.as_str().into())
        .unwrap();
    assert!(!session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_client_publish_resets_inactivity_clock() {
    let server = server_with(settings(InactivityMode::ClientOnly));
    let ctx = TransportContext::long_polling(None);
    let client_id = handshake(&server, &ctx).await;

    {
        let server = server.clone();
        let ctx = ctx.clone();
        let client_id = client_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2_500)).await;
            let publish = Message::publish("/chat", json!({"text": "still here"}))
                .with_client_id(client_id);
            server.handle(vec![publish], &ctx).await;
        });
    }

    assert_eq!(cycle(&server, &ctx, &client_id).await, Reconnect::Retry);
    // Publish at 2.5s keeps the 4s deadline at bay
    assert_eq!(cycle(&server, &ctx, &client_id).await, Reconnect::Retry);
    // 6s is 3.5s after the publish
    assert_eq!(cycle(&server, &ctx, &client_id).await, Reconnect::None);
}

#[tokio::test(start_paused = true)]
async fn test_client_mode_ignores_server_deliveries() {
    let server = server_with(settings(InactivityMode::ClientOnly));
    let ctx = TransportContext::long_polling(None);
    let client_id = handshake(&server, &ctx).await;
    subscribe(&server, &ctx, &client_id, "/feed").await;

    {
        let server = server.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(3_500)).await;
            server.publish("/feed", json!(1));
        });
    }

    assert_eq!(cycle(&server, &ctx, &client_id).await, Reconnect::Retry);
    // Message wins the race at 3.5s: delivered with retry
    let replies = server.handle(vec![connect(&client_id)], &ctx).await;
    assert_eq!(replies.len(), 2);
    assert_eq!(
        connect_reply(&replies).advice.as_ref().unwrap().reconnect,
        Reconnect::Retry
    );
    // The next connect re-evaluates and disconnects
    assert_eq!(cycle(&server, &ctx, &client_id).await, Reconnect::None);
}

#[tokio::test(start_paused = true)]
async fn test_client_server_mode_needs_both_directions_silent() {
    let server = server_with(settings(InactivityMode::ClientAndServer));
    let ctx = TransportContext::long_polling(None);
    let client_id = handshake(&server, &ctx).await;
    subscribe(&server, &ctx, &client_id, "/feed").await;

    {
        let server = server.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_500)).await;
            server.publish("/feed", json!({"tick": 1}));
        });
    }

    // 0s -> 1.5s: woken by the delivery
    assert_eq!(cycle(&server, &ctx, &client_id).await, Reconnect::Retry);
    // 1.5s -> 3.5s: client silent 3.5s, server only 2s
    assert_eq!(cycle(&server, &ctx, &client_id).await, Reconnect::Retry);
    // 3.5s -> 5.5s: both silent past 3s
    assert_eq!(cycle(&server, &ctx, &client_id).await, Reconnect::None);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_resumes_suspended_connect() {
    let mut settings = settings(InactivityMode::ClientOnly);
    settings.bayeux.timeout_ms = 30_000;
    let server = server_with(settings);
    let ctx = TransportContext::long_polling(None);
    let client_id = handshake(&server, &ctx).await;

    let token = tokio_util::sync::CancellationToken::new();
    let tasks = server.spawn_background(token.clone());

    let started = tokio::time::Instant::now();
    assert_eq!(cycle(&server, &ctx, &client_id).await, Reconnect::None);
    assert!(started.elapsed() < Duration::from_secs(5));

    token.cancel();
    for task in tasks {
        task.await.unwrap();
    }
}
