//! # Domain Layer
//!
//! Sessions, messages, advice, and the policies that decide how a suspended
//! connect is answered. Nothing here knows about HTTP, websockets, or the
//! registries that own the sessions.
//!
//! ## Structure
//!
//! - **entities**: Session, browser group, message
//! - **value_objects**: Identifiers and the advice value
//! - **services**: Advice policy composition

pub mod entities;
pub mod services;
pub mod value_objects;

// Re-export commonly used types
pub use entities::*;
pub use value_objects::*;
