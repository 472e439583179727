//! # Configuration Module
//!
//! This module handles application configuration loading and management.
//! Configuration can be loaded from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{environment}.toml)
//! - .env files (via dotenvy)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bayeux_server::config::Settings;
//!
//! let settings = Settings::load()?;
//! println!("Long-poll timeout: {:?}", settings.bayeux.timeout());
//! ```

mod settings;

pub use settings::*;
