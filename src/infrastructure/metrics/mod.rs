//! Prometheus Metrics Module
//!
//! Provides application-wide metrics collection using Prometheus.
//!
//! # Metrics Collected
//! - HTTP request counts by method, path, and status
//! - HTTP request latency histograms
//! - Active sessions and suspended connects
//! - Wake reasons, throttle decisions, advice issued
//! - Inactivity disconnects

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

const NAMESPACE: &str = "bayeux";

/// Global metrics registry
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

/// HTTP request counter - tracks total requests by method, path, and status code
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("http_requests_total", "Total number of HTTP requests").namespace(NAMESPACE),
        &["method", "path", "status"],
    )
    .expect("Failed to create HTTP_REQUESTS_TOTAL metric")
});

/// HTTP request latency histogram - long polls sit in the upper buckets
pub static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0];
    HistogramVec::new(
        HistogramOpts::new(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
        )
        .namespace(NAMESPACE)
        .buckets(buckets),
        &["method", "path"],
    )
    .expect("Failed to create HTTP_REQUEST_DURATION_SECONDS metric")
});

/// Sessions currently registered
pub static SESSIONS_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("sessions_active", "Number of registered sessions").namespace(NAMESPACE),
    )
    .expect("Failed to create SESSIONS_ACTIVE metric")
});

/// Connects currently suspended
pub static CONNECTS_SUSPENDED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::with_opts(
        Opts::new("connects_suspended", "Number of suspended connect requests")
            .namespace(NAMESPACE),
    )
    .expect("Failed to create CONNECTS_SUSPENDED metric")
});

/// Suspended connects resumed, by wake reason
pub static CONNECT_WAKES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("connect_wakes_total", "Suspended connects resumed").namespace(NAMESPACE),
        &["reason"], // "message", "timeout", "cancelled"
    )
    .expect("Failed to create CONNECT_WAKES_TOTAL metric")
});

/// Browser throttle decisions
pub static THROTTLE_DECISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("throttle_decisions_total", "Browser throttle decisions").namespace(NAMESPACE),
        &["decision"], // "proceed", "delay", "deny"
    )
    .expect("Failed to create THROTTLE_DECISIONS_TOTAL metric")
});

/// Advice attached to connect replies
pub static ADVICE_ISSUED_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("advice_issued_total", "Advice attached to connect replies")
            .namespace(NAMESPACE),
        &["reconnect", "outcome"],
    )
    .expect("Failed to create ADVICE_ISSUED_TOTAL metric")
});

/// Sessions ended by the inactivity monitor
pub static INACTIVITY_DISCONNECTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::with_opts(
        Opts::new(
            "inactivity_disconnects_total",
            "Sessions disconnected for inactivity",
        )
        .namespace(NAMESPACE),
    )
    .expect("Failed to create INACTIVITY_DISCONNECTS_TOTAL metric")
});

/// Register all metrics with the registry
fn register_metrics(registry: &Registry) {
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .expect("Failed to register HTTP_REQUESTS_TOTAL");
    registry
        .register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()))
        .expect("Failed to register HTTP_REQUEST_DURATION_SECONDS");
    registry
        .register(Box::new(SESSIONS_ACTIVE.clone()))
        .expect("Failed to register SESSIONS_ACTIVE");
    registry
        .register(Box::new(CONNECTS_SUSPENDED.clone()))
        .expect("Failed to register CONNECTS_SUSPENDED");
    registry
        .register(Box::new(CONNECT_WAKES_TOTAL.clone()))
        .expect("Failed to register CONNECT_WAKES_TOTAL");
    registry
        .register(Box::new(THROTTLE_DECISIONS_TOTAL.clone()))
        .expect("Failed to register THROTTLE_DECISIONS_TOTAL");
    registry
        .register(Box::new(ADVICE_ISSUED_TOTAL.clone()))
        .expect("Failed to register ADVICE_ISSUED_TOTAL");
    registry
        .register(Box::new(INACTIVITY_DISCONNECTS_TOTAL.clone()))
        .expect("Failed to register INACTIVITY_DISCONNECTS_TOTAL");
}

/// Collect and encode all metrics as Prometheus text format
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Helper to record HTTP request metrics
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration_secs);
}

pub fn set_sessions_active(count: usize) {
    SESSIONS_ACTIVE.set(count as i64);
}

pub fn connect_suspended() {
    CONNECTS_SUSPENDED.inc();
}

pub fn connect_resumed(reason: &str) {
    CONNECTS_SUSPENDED.dec();
    CONNECT_WAKES_TOTAL.with_label_values(&[reason]).inc();
}

/// Suspension abandoned because the request went away
pub fn connect_abandoned() {
    CONNECTS_SUSPENDED.dec();
}

pub fn record_throttle_decision(decision: &str) {
    THROTTLE_DECISIONS_TOTAL.with_label_values(&[decision]).inc();
}

pub fn record_advice(reconnect: &str, outcome: &str) {
    ADVICE_ISSUED_TOTAL
        .with_label_values(&[reconnect, outcome])
        .inc();
}

pub fn record_inactivity_disconnect() {
    INACTIVITY_DISCONNECTS_TOTAL.inc();
}
