//! In-memory registries.
//!
//! All three are `DashMap` based and shared behind `Arc`. None of them is
//! ever locked across an await point.

mod browser_registry;
mod channel_registry;
mod session_directory;

pub use browser_registry::BrowserRegistry;
pub use channel_registry::ChannelRegistry;
pub use session_directory::SessionDirectory;
