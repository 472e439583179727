//! Application Services
//!
//! Services that coordinate the domain types and registries.
//!
//! ## Available Services
//!
//! - **BayeuxServer**: Message batch processing and session lifecycle
//! - **ConnectScheduler**: Suspends connects until a wake condition
//! - **BrowserThrottle**: Per-browser limit on suspended long polls
//! - **InactivityMonitor**: Ends silent sessions

pub mod activity;
pub mod bayeux_service;
pub mod scheduler;
pub mod throttle;

pub use activity::InactivityMonitor;
pub use bayeux_service::{BayeuxServer, BayeuxService, TransportContext, TransportKind};
pub use scheduler::{ConnectReply, ConnectScheduler};
pub use throttle::{BrowserThrottle, SuspendedSlot, ThrottleDecision};
