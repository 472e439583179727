//! Route Configuration
//!
//! Configures all HTTP routes.

use axum::{middleware, response::IntoResponse, routing::get, Router};

use super::handlers;
use crate::infrastructure::metrics;
use crate::presentation::middleware::track_metrics;
use crate::presentation::websocket::ws_handler;
use crate::startup::AppState;

/// Bayeux endpoint path
pub const BAYEUX_PATH: &str = "/cometd";

/// Create the main router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Both transports share one path: GET upgrades, POST long-polls
        .route(
            BAYEUX_PATH,
            get(ws_handler).post(handlers::long_polling::handle_batch),
        )
        // Health check endpoints
        .route("/health", get(handlers::health::health_check))
        .route("/health/live", get(handlers::health::liveness))
        .route("/health/ready", get(handlers::health::readiness))
        // Prometheus metrics endpoint
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn(track_metrics))
        .with_state(state)
}

/// Prometheus metrics endpoint handler
async fn metrics_handler() -> impl IntoResponse {
    let metrics = metrics::gather_metrics();
    (
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        metrics,
    )
}
