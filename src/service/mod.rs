//! # Service Layer
//!
//! The connection-facing runtime: the Netron core dispatcher, the per-peer
//! state machine and the flow-controlled stream multiplexer.

pub mod netron;
pub mod peer;
pub mod stream;
