//! # Domain Services
//!
//! - **AdviceEngine**: Composes ordered advice policies into one reconnect
//!   instruction per reply

mod advice_policy;

pub use advice_policy::*;
