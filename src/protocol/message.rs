//! # Message Payloads
//!
//! The serde types carried inside packet envelopes, one per action family,
//! encoded with `bincode` on the wire. `STREAM_DATA` payloads are raw bytes
//! and never pass through this module.

use crate::error::{NetronError, Result};
use crate::protocol::definition::Definition;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A self-describing value tree for properties, arguments and events.
///
/// `Value::Definition` is how a nested context crosses the wire: the callee
/// auto-attaches the new context and ships its definition instead of data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(HashMap<String, Value>),
    Definition(Definition),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

/// Identity exchange performed while HANDSHAKING. Carries each side's
/// instance uid and the definitions of its attached contexts so name
/// resolution needs no extra round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hello {
    pub uid: u64,
    pub definitions: HashMap<String, Definition>,
}

/// GET request: property read when `args` is `None`, method call otherwise
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRequest {
    pub def_id: u64,
    pub member: String,
    pub args: Option<Vec<Value>>,
}

/// SET request: property write
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetRequest {
    pub def_id: u64,
    pub member: String,
    pub value: Value,
}

/// EVENT_ON / EVENT_OFF request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRequest {
    pub def_id: u64,
    pub event: String,
}

/// EVENT_EMIT push
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEmit {
    pub def_id: u64,
    pub event: String,
    pub data: Value,
}

/// CONTEXT_ATTACH push: a context appeared on the sending side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextAttach {
    pub name: String,
    pub definition: Definition,
}

/// CONTEXT_DETACH push: a definition (or one of its originated children)
/// disappeared on the sending side
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextDetach {
    pub def_id: u64,
    pub release_originated: bool,
}

/// Every response payload: the outcome of the remote operation. Remote
/// faults ride the `Err` arm, never a transport error.
pub type Reply = std::result::Result<Value, NetronError>;

/// Encode a payload with the protocol's binary codec
pub fn encode<T: Serialize>(value: &T) -> Result<Bytes> {
    let raw = bincode::serialize(value)?;
    Ok(Bytes::from(raw))
}

/// Decode a payload; a failure here means the peer violated the protocol
pub fn decode<'a, T: Deserialize<'a>>(buf: &'a [u8]) -> Result<T> {
    Ok(bincode::deserialize(buf)?)
}
