//! Browser throttle: several sessions behind one browser cookie

use std::time::Duration;

use futures::future::join_all;
use pretty_assertions::assert_eq;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use bayeux_server::application::services::{BayeuxService, TransportContext};
use bayeux_server::config::Settings;
use bayeux_server::domain::value_objects::{BrowserId, Reconnect};

use crate::common::*;

/// Shipped defaults: 30s timeout, 10s maxInterval, one long poll per
/// browser, 2s stagger interval.
fn throttled_settings() -> Settings {
    let mut settings = Settings::default();
    settings.browser.max_sessions_per_browser = 1;
    settings.browser.multi_session_interval_ms = 2_000;
    settings
}

#[tokio::test(start_paused = true)]
async fn test_staggered_sessions_keep_long_polling() {
    let settings = throttled_settings();
    let timeout = settings.bayeux.timeout();
    assert!(timeout > settings.bayeux.max_interval());
    let server = server_with(settings);
    let token = CancellationToken::new();
    let background = server.spawn_background(token.clone());
    let ctx = TransportContext::long_polling(Some(BrowserId::generate()));

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(handshake(&server, &ctx).await);
    }

    for cycle in 0..3 {
        let replies = join_all(clients.iter().map(|id| {
            let server = server.clone();
            let ctx = ctx.clone();
            async move {
                let started = Instant::now();
                let replies = server.handle(vec![connect(id)], &ctx).await;
                (started.elapsed(), replies)
            }
        }))
        .await;

        for (held_for, replies) in &replies {
            let reply = connect_reply(replies);
            let advice = reply.advice.as_ref().unwrap();
            assert!(reply.is_successful(), "cycle {cycle}: {:?}", reply.error);
            assert_eq!(advice.reconnect, Reconnect::Retry, "cycle {cycle}");
            assert!(!advice.multiple_clients, "cycle {cycle}");
            // staggered or not, every connect stays a full long poll
            assert!(*held_for >= timeout, "cycle {cycle}: held {held_for:?}");
            assert!(
                *held_for < timeout + Duration::from_millis(50),
                "cycle {cycle}: held {held_for:?}"
            );
        }

        // Client-side gap before the next poll
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(server.session_count(), 3, "cycle {cycle}");
    }

    token.cancel();
    for task in background {
        task.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_session_survives_gap_after_full_timeout() {
    let server = server_with(Settings::default());
    let token = CancellationToken::new();
    let background = server.spawn_background(token.clone());
    let ctx = TransportContext::long_polling(None);
    let client_id = handshake(&server, &ctx).await;

    let replies = server.handle(vec![connect(&client_id)], &ctx).await;
    assert!(connect_reply(&replies).is_successful());

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert_eq!(server.session_count(), 1);

    let started = Instant::now();
    let replies = server.handle(vec![connect(&client_id)], &ctx).await;
    assert!(connect_reply(&replies).is_successful());
    assert!(started.elapsed() >= Duration::from_secs(30));

    // Silence past maxInterval after the last reply still expires it
    tokio::time::sleep(Duration::from_secs(12)).await;
    assert_eq!(server.session_count(), 0);

    token.cancel();
    for task in background {
        task.await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_connect_keeps_the_browser_slot() {
    let mut settings = test_settings();
    settings.browser.max_sessions_per_browser = 1;
    settings.browser.multi_session_interval_ms = 0;
    let server = server_with(settings);
    let ctx = TransportContext::long_polling(Some(BrowserId::generate()));

    let first = handshake(&server, &ctx).await;
    let second = handshake(&server, &ctx).await;

    let holder = {
        let server = server.clone();
        let ctx = ctx.clone();
        let first = first.clone();
        tokio::spawn(async move { server.handle(vec![connect(&first)], &ctx).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let duplicate = server.handle(vec![connect(&first)], &ctx).await;
    let reply = connect_reply(&duplicate);
    assert!(!reply.is_successful());
    assert_eq!(
        reply.error.as_deref(),
        Some(format!("409:{first}:concurrent_connect").as_str())
    );

    // The slot still belongs to the suspended connect
    let started = Instant::now();
    let replies = server.handle(vec![connect(&second)], &ctx).await;
    assert_eq!(started.elapsed(), Duration::ZERO);
    let advice = connect_reply(&replies).advice.clone().unwrap();
    assert_eq!(advice.reconnect, Reconnect::None);
    assert!(advice.multiple_clients);

    let held = holder.await.unwrap();
    assert!(connect_reply(&held).is_successful());
}

#[tokio::test(start_paused = true)]
async fn test_excess_session_denied_without_stagger_interval() {
    let mut settings = test_settings();
    settings.browser.max_sessions_per_browser = 1;
    settings.browser.multi_session_interval_ms = 0;
    let server = server_with(settings);
    let ctx = TransportContext::long_polling(Some(BrowserId::generate()));

    let first = handshake(&server, &ctx).await;
    let second = handshake(&server, &ctx).await;

    // First session takes the only slot
    let holder = {
        let server = server.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { server.handle(vec![connect(&first)], &ctx).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let started = tokio::time::Instant::now();
    let replies = server.handle(vec![connect(&second)], &ctx).await;
    assert_eq!(started.elapsed(), Duration::ZERO);

    let advice = connect_reply(&replies).advice.clone().unwrap();
    assert_eq!(advice.reconnect, Reconnect::None);
    assert!(advice.multiple_clients);

    let held = holder.await.unwrap();
    let advice = connect_reply(&held).advice.clone().unwrap();
    assert_eq!(advice.reconnect, Reconnect::Retry);
    assert!(!advice.multiple_clients);
}

#[tokio::test(start_paused = true)]
async fn test_sessions_of_different_browsers_are_independent() {
    let mut settings = test_settings();
    settings.browser.max_sessions_per_browser = 1;
    settings.browser.multi_session_interval_ms = 0;
    let server = server_with(settings);
    let ctx_a = TransportContext::long_polling(Some(BrowserId::generate()));
    let ctx_b = TransportContext::long_polling(Some(BrowserId::generate()));

    let a = handshake(&server, &ctx_a).await;
    let b = handshake(&server, &ctx_b).await;

    let (ra, rb) = tokio::join!(
        server.handle(vec![connect(&a)], &ctx_a),
        server.handle(vec![connect(&b)], &ctx_b),
    );

    assert_eq!(
        connect_reply(&ra).advice.as_ref().unwrap().reconnect,
        Reconnect::Retry
    );
    assert_eq!(
        connect_reply(&rb).advice.as_ref().unwrap().reconnect,
        Reconnect::Retry
    );
}

#[tokio::test(start_paused = true)]
async fn test_websocket_sessions_are_not_throttled() {
    let mut settings = test_settings();
    settings.browser.max_sessions_per_browser = 1;
    settings.browser.multi_session_interval_ms = 0;
    let server = server_with(settings);
    let ctx = TransportContext::websocket(Some(BrowserId::generate()));

    let a = handshake(&server, &ctx).await;
    let b = handshake(&server, &ctx).await;

    let (ra, rb) = tokio::join!(
        server.handle(vec![connect(&a)], &ctx),
        server.handle(vec![connect(&b)], &ctx),
    );

    for replies in [ra, rb] {
        let advice = connect_reply(&replies).advice.clone().unwrap();
        assert_eq!(advice.reconnect, Reconnect::Retry);
    }
}
