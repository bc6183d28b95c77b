//! # Protocol Layer
//!
//! The distributed-object model: payload types, context definitions, stubs
//! and remote interface proxies.
//!
//! ## Components
//! - **Message**: serde payload types carried inside packet envelopes
//! - **Definition**: the serializable public surface of a context
//! - **Stub**: core-side wrapper enforcing capability access rules
//! - **Interface**: local proxy standing in for a remote definition

pub mod definition;
pub mod interface;
pub mod message;
pub mod stub;

#[cfg(test)]
mod tests;
