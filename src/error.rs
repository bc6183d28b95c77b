//! # Error Types
//!
//! Unified error handling for the Netron protocol layer.
//!
//! This module defines every failure that can surface from protocol
//! operations, from packet decoding up to remote invocation faults.
//!
//! ## Error Categories
//! - **I/O Errors**: transport and socket failures
//! - **Protocol Errors**: malformed packets, unsupported actions, timeouts
//! - **Registry Errors**: unknown or duplicate contexts and definitions
//! - **Access Errors**: private/readonly capability violations
//!
//! Remote operation failures travel back inside response payloads, so every
//! variant is serde-serializable. Variants wrapping foreign error types
//! (`Io`, `Serialization`) carry the rendered message rather than the source
//! so the variant set is identical on both sides of the wire.

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Type alias for Results using NetronError
pub type Result<T> = std::result::Result<T, NetronError>;

// NetronError is the primary error type for all protocol operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum NetronError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Malformed packet")]
    MalformedPacket,

    #[error("Packet too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Not exists: {0}")]
    NotExists(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid access: {0}")]
    InvalidAccess(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<io::Error> for NetronError {
    fn from(e: io::Error) -> Self {
        NetronError::Io(e.to_string())
    }
}

impl From<bincode::Error> for NetronError {
    fn from(e: bincode::Error) -> Self {
        NetronError::Serialization(e.to_string())
    }
}
