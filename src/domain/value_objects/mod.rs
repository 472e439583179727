//! Value Objects
//!
//! Immutable value types shared by the server and the client.

pub mod advice;
pub mod ids;

pub use advice::{Advice, Reconnect};
pub use ids::{BrowserId, SessionId};
