//! Health Check API Tests

use axum::http::StatusCode;
use pretty_assertions::assert_eq;

use crate::common::*;

#[tokio::test]
async fn test_health_check_returns_ok() {
    let app = TestApp::new();

    let response = app.get("/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
}

#[tokio::test]
async fn test_liveness_probe() {
    let app = TestApp::new();

    let response = app.get("/health/live").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "alive");
}

#[tokio::test]
async fn test_readiness_reports_sessions() {
    let app = TestApp::new();
    app.post_bayeux(r#"[{"channel":"/meta/handshake"}]"#, None)
        .await;

    let response = app.get("/health/ready").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["sessions"]["active"], 1);
    assert_eq!(json["sessions"]["suspended_connects"], 0);
}

#[tokio::test]
async fn test_readiness_draining_after_shutdown() {
    let app = TestApp::new();
    app.server().shutdown();

    let response = app.get("/health/ready").await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["status"], "draining");
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_bayeux_metrics() {
    let app = TestApp::new();

    let response = app.get("/metrics").await;

    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;
    assert!(text.contains("bayeux_sessions_active"));
}
