//! Application Layer
//!
//! Orchestrates sessions, registries and advice policies into the Bayeux
//! server the transports call into.

pub mod services;
