//! # Utilities
//!
//! Logging setup and timeout helpers shared across the crate.

pub mod logging;
pub mod timeout;
