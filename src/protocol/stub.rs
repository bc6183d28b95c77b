//! # Stub
//!
//! The core-side wrapper binding a local context instance to its published
//! [`Definition`] and enforcing the capability flags on every remote access.
//!
//! A stub is exclusively owned by the Netron core that attached the context;
//! peers only ever hold definition ids. Dispatch clones the `Arc<Stub>` out
//! of the registry before invoking it, so a concurrent detach can never free
//! state under an in-flight call.

use crate::error::{NetronError, Result};
use crate::protocol::definition::{CapabilityDescriptor, Definition};
use crate::protocol::message::Value;

/// Outcome of a context method call
pub enum CallResult {
    /// Plain data result
    Value(Value),
    /// A new context to expose; only honored for methods declared with
    /// `returns_context` in the capability descriptor
    Context {
        instance: Box<dyn Context>,
        descriptor: CapabilityDescriptor,
        name: String,
    },
}

impl From<Value> for CallResult {
    fn from(v: Value) -> Self {
        CallResult::Value(v)
    }
}

impl std::fmt::Debug for CallResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallResult::Value(v) => f.debug_tuple("Value").field(v).finish(),
            CallResult::Context { name, .. } => {
                f.debug_struct("Context").field("name", name).finish_non_exhaustive()
            }
        }
    }
}

/// A local object intentionally exposed to remote peers.
///
/// Access control is not the implementor's concern: the wrapping [`Stub`]
/// rejects private/readonly violations before these methods are reached.
/// Implementations use interior mutability for writable state.
pub trait Context: Send + Sync + 'static {
    fn get(&self, property: &str) -> Result<Value> {
        Err(NetronError::NotSupported(format!(
            "property '{property}' not readable"
        )))
    }

    fn set(&self, property: &str, _value: Value) -> Result<()> {
        Err(NetronError::NotSupported(format!(
            "property '{property}' not writable"
        )))
    }

    fn call(&self, method: &str, _args: Vec<Value>) -> Result<CallResult> {
        Err(NetronError::NotSupported(format!(
            "method '{method}' not implemented"
        )))
    }
}

/// Binds one context instance to one definition
pub struct Stub {
    definition: Definition,
    instance: Box<dyn Context>,
}

impl Stub {
    pub fn new(instance: Box<dyn Context>, definition: Definition) -> Self {
        Self {
            definition,
            instance,
        }
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    /// Read a property, enforcing the `private` flag
    pub fn get(&self, property: &str) -> Result<Value> {
        match self.definition.property(property) {
            None => Err(NetronError::NotExists(format!("property '{property}'"))),
            Some(meta) if meta.private => Err(NetronError::InvalidAccess(format!(
                "property '{property}' is private"
            ))),
            Some(_) => self.instance.get(property),
        }
    }

    /// Write a property, enforcing the `private` and `readonly` flags
    pub fn set(&self, property: &str, value: Value) -> Result<()> {
        match self.definition.property(property) {
            None => Err(NetronError::NotExists(format!("property '{property}'"))),
            Some(meta) if meta.private => Err(NetronError::InvalidAccess(format!(
                "property '{property}' is private"
            ))),
            Some(meta) if meta.readonly => Err(NetronError::InvalidAccess(format!(
                "property '{property}' is readonly"
            ))),
            Some(_) => self.instance.set(property, value),
        }
    }

    /// Invoke a method declared in the definition
    pub fn call(&self, method: &str, args: Vec<Value>) -> Result<CallResult> {
        if self.definition.method(method).is_none() {
            return Err(NetronError::NotExists(format!("method '{method}'")));
        }
        self.instance.call(method, args)
    }
}
