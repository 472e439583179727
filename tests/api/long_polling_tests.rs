//! Long-polling transport over HTTP

use axum::http::{header, StatusCode};
use pretty_assertions::assert_eq;
use serde_json::json;

use crate::common::*;

#[tokio::test]
async fn test_handshake_sets_browser_cookie() {
    let app = TestApp::new();

    let response = app
        .post_bayeux(r#"{"channel":"/meta/handshake","id":"1"}"#, None)
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let cookie = browser_cookie(&response);
    assert!(cookie.is_some());

    let json = body_json(response).await;
    assert!(json.is_array());
    assert_eq!(json[0]["channel"], "/meta/handshake");
    assert_eq!(json[0]["id"], "1");
    assert_eq!(json[0]["successful"], true);
    assert!(json[0]["clientId"].is_string());
    assert_eq!(json[0]["advice"]["reconnect"], "retry");
}

#[tokio::test]
async fn test_presented_cookie_is_not_reissued() {
    let app = TestApp::new();
    let first = app
        .post_bayeux(r#"[{"channel":"/meta/handshake"}]"#, None)
        .await;
    let cookie = browser_cookie(&first).unwrap();

    let second = app
        .post_bayeux(r#"[{"channel":"/meta/handshake"}]"#, Some(&cookie))
        .await;

    assert_eq!(second.status(), StatusCode::OK);
    assert!(second.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_first_connect_returns_immediately() {
    let app = TestApp::new();
    let response = app
        .post_bayeux(r#"[{"channel":"/meta/handshake"}]"#, None)
        .await;
    let cookie = browser_cookie(&response).unwrap();
    let client_id = body_json(response).await[0]["clientId"]
        .as_str()
        .unwrap()
        .to_string();

    let connect = json!([{
        "channel": "/meta/connect",
        "clientId": client_id,
        "connectionType": "long-polling",
        "advice": {"timeout": 0}
    }]);
    let started = tokio::time::Instant::now();
    let response = app.post_bayeux(&connect.to_string(), Some(&cookie)).await;

    assert_eq!(started.elapsed(), std::time::Duration::ZERO);
    let json = body_json(response).await;
    assert_eq!(json[0]["successful"], true);
    assert_eq!(json[0]["advice"]["reconnect"], "retry");
    assert_eq!(json[0]["advice"]["timeout"], 2000);
}

#[tokio::test(start_paused = true)]
async fn test_connect_held_until_timeout() {
    let app = TestApp::new();
    let response = app
        .post_bayeux(r#"[{"channel":"/meta/handshake"}]"#, None)
        .await;
    let cookie = browser_cookie(&response).unwrap();
    let client_id = body_json(response).await[0]["clientId"]
        .as_str()
        .unwrap()
        .to_string();

    let connect = json!({
        "channel": "/meta/connect",
        "clientId": client_id,
        "connectionType": "long-polling"
    });
    let started = tokio::time::Instant::now();
    let response = app.post_bayeux(&connect.to_string(), Some(&cookie)).await;

    assert!(started.elapsed() >= std::time::Duration::from_secs(2));
    let json = body_json(response).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["successful"], true);
}

#[tokio::test]
async fn test_connect_with_unknown_client_advises_handshake() {
    let app = TestApp::new();

    let response = app
        .post_bayeux(
            r#"[{"channel":"/meta/connect","clientId":"missing","connectionType":"long-polling"}]"#,
            None,
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json[0]["successful"], false);
    assert_eq!(json[0]["advice"]["reconnect"], "handshake");
}

#[tokio::test]
async fn test_unknown_meta_channel_is_rejected() {
    let app = TestApp::new();

    let response = app
        .post_bayeux(r#"[{"channel":"/meta/bogus"}]"#, None)
        .await;

    let json = body_json(response).await;
    assert_eq!(json[0]["successful"], false);
    assert_eq!(json[0]["error"], "400::unknown_meta_channel");
}

#[tokio::test]
async fn test_empty_batch_is_bad_request() {
    let app = TestApp::new();

    let response = app.post_bayeux("[]", None).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let app = TestApp::new();

    let response = app.post_bayeux("{not json", None).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
