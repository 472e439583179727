//! Infrastructure Layer
//!
//! Contains the in-process implementations the services depend on:
//! - Session, browser and channel registries
//! - Prometheus metrics

pub mod metrics;
pub mod registry;
