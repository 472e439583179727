//! # Domain Entities
//!
//! Core records of the connection-lifecycle subsystem.
//!
//! - **Message**: Bayeux message as carried by both transports
//! - **ServerSession**: One logical client, its queue and its pending connect
//! - **BrowserGroup**: Sessions sharing one browser token

mod browser;
mod message;
mod session;

pub use browser::{BrowserGroup, SiblingRank};
pub use message::{channels, connection_types, Message, MessageBatch, BAYEUX_VERSION};
pub use session::{ArmedConnect, ConnectInFlight, Enqueued, ServerSession, WakeReason};
