//! # Interface
//!
//! The local proxy standing in for a remote [`Definition`].
//!
//! An interface is created lazily by its owning [`Peer`] the first time a
//! definition is resolved and cached per `(peer, definition id)`, so
//! repeated lookups return the identical `Arc` and pointer comparisons on
//! proxies behave as callers expect.
//!
//! Member access is validated against the cached definition before any
//! packet is sent: unknown members fail with `NotExists` and readonly or
//! private violations with `InvalidAccess` without a round trip. The
//! dispatch surface is the definition itself rather than generated code -
//! the explicit table of members replaces the dynamic property interception
//! of reflective runtimes.

use crate::error::{NetronError, Result};
use crate::protocol::definition::Definition;
use crate::protocol::message::Value;
use crate::service::peer::Peer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Handler invoked for every matching EVENT_EMIT, in subscription order
pub type EventHandler = Box<dyn Fn(&Value) + Send + Sync + 'static>;

/// Result of a proxied method call: plain data, or a nested proxy when the
/// remote method originated a new context
#[derive(Debug)]
pub enum CallReply {
    Value(Value),
    Interface(Arc<Interface>),
}

impl CallReply {
    pub fn into_value(self) -> Result<Value> {
        match self {
            CallReply::Value(v) => Ok(v),
            CallReply::Interface(_) => Err(NetronError::NotSupported(
                "call returned a nested interface, not a value".into(),
            )),
        }
    }

    pub fn into_interface(self) -> Result<Arc<Interface>> {
        match self {
            CallReply::Interface(i) => Ok(i),
            CallReply::Value(_) => Err(NetronError::NotSupported(
                "call returned a value, not a nested interface".into(),
            )),
        }
    }
}

/// A proxy bound to `{definition, peer}`
pub struct Interface {
    definition: Definition,
    peer: Weak<Peer>,
    released: AtomicBool,
}

impl std::fmt::Debug for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interface")
            .field("def_id", &self.definition.id)
            .field("name", &self.definition.name)
            .field("released", &self.is_released())
            .finish_non_exhaustive()
    }
}

impl Interface {
    pub(crate) fn new(definition: Definition, peer: &Arc<Peer>) -> Self {
        Self {
            definition,
            peer: Arc::downgrade(peer),
            released: AtomicBool::new(false),
        }
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    pub fn def_id(&self) -> u64 {
        self.definition.id
    }

    /// Permanently invalidate this proxy. Called when the owning side
    /// detaches the context with `release_originated`.
    pub(crate) fn release(&self) {
        self.released.store(true, Ordering::Release);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    fn peer(&self) -> Result<Arc<Peer>> {
        if self.is_released() {
            return Err(NetronError::NotExists(format!(
                "definition {} has been released",
                self.definition.id
            )));
        }
        self.peer.upgrade().ok_or(NetronError::ConnectionLost)
    }

    /// Read a remote property
    pub async fn get(&self, property: &str) -> Result<Value> {
        let meta = self
            .definition
            .property(property)
            .ok_or_else(|| NetronError::NotExists(format!("property '{property}'")))?;
        if meta.private {
            return Err(NetronError::InvalidAccess(format!(
                "property '{property}' is private"
            )));
        }
        self.peer()?.get(self.definition.id, property).await
    }

    /// Write a remote property
    pub async fn set(&self, property: &str, value: Value) -> Result<()> {
        let meta = self
            .definition
            .property(property)
            .ok_or_else(|| NetronError::NotExists(format!("property '{property}'")))?;
        if meta.private {
            return Err(NetronError::InvalidAccess(format!(
                "property '{property}' is private"
            )));
        }
        if meta.readonly {
            return Err(NetronError::InvalidAccess(format!(
                "property '{property}' is readonly"
            )));
        }
        self.peer()?.set(self.definition.id, property, value).await
    }

    /// Invoke a remote method. A definition-shaped result is wrapped into a
    /// nested interface on the same peer.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<CallReply> {
        if self.definition.method(method).is_none() {
            return Err(NetronError::NotExists(format!("method '{method}'")));
        }
        let peer = self.peer()?;
        let result = peer.call(self.definition.id, method, args).await?;
        match result {
            Value::Definition(def) => Ok(CallReply::Interface(peer.intern_interface(def))),
            value => Ok(CallReply::Value(value)),
        }
    }

    /// Subscribe a handler to a remote event
    pub async fn subscribe<F>(&self, event: &str, handler: F) -> Result<()>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        if !self.definition.has_event(event) {
            return Err(NetronError::NotExists(format!("event '{event}'")));
        }
        self.peer()?
            .subscribe(self.definition.id, event, Box::new(handler))
            .await
    }

    /// Drop every local handler for the event and unregister remotely
    pub async fn unsubscribe(&self, event: &str) -> Result<()> {
        if !self.definition.has_event(event) {
            return Err(NetronError::NotExists(format!("event '{event}'")));
        }
        self.peer()?.unsubscribe(self.definition.id, event).await
    }
}
