//! Message queueing and delivery on connect replies

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use bayeux_server::application::services::{BayeuxService, TransportContext};
use bayeux_server::domain::entities::{channels, Message};

use crate::common::*;

#[tokio::test(start_paused = true)]
async fn test_queued_messages_delivered_in_publish_order() {
    let server = server_with(test_settings());
    let ctx = TransportContext::long_polling(None);
    let client_id = handshake(&server, &ctx).await;
    subscribe(&server, &ctx, &client_id, "/orders").await;

    for n in 1..=3 {
        assert_eq!(server.publish("/orders", json!({"n": n})), 1);
    }

    let started = tokio::time::Instant::now();
    let replies = server.handle(vec![connect(&client_id)], &ctx).await;
    assert_eq!(started.elapsed(), Duration::ZERO);

    let delivered: Vec<_> = replies
        .iter()
        .filter(|m| m.channel == "/orders")
        .map(|m| m.data.clone().unwrap()["n"].clone())
        .collect();
    assert_eq!(delivered, vec![json!(1), json!(2), json!(3)]);
    assert_eq!(replies.last().unwrap().channel, channels::META_CONNECT);
}

#[tokio::test(start_paused = true)]
async fn test_client_publish_reaches_other_subscriber() {
    let server = server_with(test_settings());
    let ctx = TransportContext::long_polling(None);
    let sender = handshake(&server, &ctx).await;
    let receiver = handshake(&server, &ctx).await;
    subscribe(&server, &ctx, &receiver, "/chat").await;

    let publish = Message::publish("/chat", json!("hello"))
        .with_id("42")
        .with_client_id(&sender);
    let replies = server.handle(vec![publish], &ctx).await;
    assert!(replies[0].is_successful());
    assert_eq!(replies[0].id.as_deref(), Some("42"));

    let replies = server.handle(vec![connect(&receiver)], &ctx).await;
    assert_eq!(replies[0].channel, "/chat");
    assert_eq!(replies[0].data, Some(json!("hello")));
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribed_session_receives_nothing() {
    let server = server_with(test_settings());
    let ctx = TransportContext::long_polling(None);
    let client_id = handshake(&server, &ctx).await;
    subscribe(&server, &ctx, &client_id, "/news").await;

    let mut unsubscribe = Message::new(channels::META_UNSUBSCRIBE).with_client_id(&client_id);
    unsubscribe.subscription = Some("/news".to_string());
    server.handle(vec![unsubscribe], &ctx).await;

    assert_eq!(server.publish("/news", json!(1)), 0);
}

#[tokio::test(start_paused = true)]
async fn test_service_channel_publish_is_not_broadcast() {
    let server = server_with(test_settings());
    let ctx = TransportContext::long_polling(None);
    let client_id = handshake(&server, &ctx).await;
    subscribe(&server, &ctx, &client_id, "/service/echo").await;

    let publish = Message::publish("/service/echo", json!(1)).with_client_id(&client_id);
    let replies = server.handle(vec![publish], &ctx).await;
    assert!(replies[0].is_successful());

    let session = server
        .sessions()
        .lookup(&client_id.as_str().into())
        .unwrap();
    assert!(!session.has_queued());
}

#[tokio::test(start_paused = true)]
async fn test_idle_session_expires_after_max_interval() {
    let server = server_with(test_settings());
    let ctx = TransportContext::long_polling(None);
    let client_id = handshake(&server, &ctx).await;

    tokio::time::advance(Duration::from_millis(10_001)).await;
    assert_eq!(server.sweep(), 1);

    let replies = server.handle(vec![connect(&client_id)], &ctx).await;
    assert!(!replies[0].is_successful());
}
