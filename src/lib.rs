//! # Bayeux Server Library
//!
//! This crate provides the connection-lifecycle core of a Bayeux
//! publish/subscribe server, and a client that negotiates its transport:
//! - Long-poll connect scheduling with single-claim wakeups
//! - Reconnect advice composed from ordered policies
//! - Per-browser throttling of suspended long polls
//! - Inactivity monitoring
//! - Client transport negotiation with timeout-driven fallback
//!
//! ## Architecture
//!
//! The crate follows Clean Architecture principles:
//!
//! - **Domain Layer**: Sessions, messages, advice and advice policies
//! - **Application Layer**: Scheduler, throttle, monitor and the server façade
//! - **Infrastructure Layer**: In-memory registries and metrics
//! - **Presentation Layer**: HTTP long-polling and WebSocket transports
//!
//! ## Module Structure
//!
//! ```text
//! bayeux_server/
//! +-- config/         Configuration management
//! +-- domain/         Entities, value objects, advice policies
//! +-- application/    Scheduler, throttle, inactivity, server
//! +-- infrastructure/ Registries and metrics
//! +-- presentation/   HTTP routes and transports
//! +-- client/         Transport-negotiating client
//! +-- shared/         Common utilities (errors)
//! ```

// Configuration module
pub mod config;

// Domain layer - Core business logic
pub mod domain;

// Application layer - Business services
pub mod application;

// Infrastructure layer - Registries and metrics
pub mod infrastructure;

// Presentation layer - HTTP and WebSocket handlers
pub mod presentation;

// Client side - transport negotiation
pub mod client;

// Shared utilities
pub mod shared;

// Application startup and state management
pub mod startup;

// Telemetry and observability
pub mod telemetry;
