//! # Definition
//!
//! The serializable description of a context's public surface.
//!
//! A [`CapabilityDescriptor`] is built explicitly by the code attaching a
//! context (no reflection): which properties exist and whether they are
//! readonly/private, which methods exist and whether they return a nested
//! context, and which events may be subscribed. Attaching stamps the
//! descriptor with a fresh id (and parent id for originated contexts),
//! producing the immutable [`Definition`] that peers cache.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Access metadata for a single property
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyMeta {
    pub readonly: bool,
    pub private: bool,
    /// Optional human-readable type hint, not interpreted by the protocol
    pub value_type: Option<String>,
}

/// Metadata for a single method
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodMeta {
    /// Methods must opt in to returning a nested context; the result of an
    /// undeclared method is always treated as plain data.
    pub returns_context: bool,
}

/// The statically-built capability surface passed to `attach_context`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityDescriptor {
    pub properties: HashMap<String, PropertyMeta>,
    pub methods: HashMap<String, MethodMeta>,
    pub events: BTreeSet<String>,
}

impl CapabilityDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a public read/write property
    pub fn property(mut self, name: &str) -> Self {
        self.properties
            .insert(name.to_string(), PropertyMeta::default());
        self
    }

    /// Declare a readonly property (remote writes fail with `InvalidAccess`)
    pub fn readonly_property(mut self, name: &str) -> Self {
        self.properties.insert(
            name.to_string(),
            PropertyMeta {
                readonly: true,
                ..Default::default()
            },
        );
        self
    }

    /// Declare a private property (remote access fails with `InvalidAccess`)
    pub fn private_property(mut self, name: &str) -> Self {
        self.properties.insert(
            name.to_string(),
            PropertyMeta {
                private: true,
                ..Default::default()
            },
        );
        self
    }

    /// Declare a method returning plain data
    pub fn method(mut self, name: &str) -> Self {
        self.methods.insert(name.to_string(), MethodMeta::default());
        self
    }

    /// Declare a method returning a nested context
    pub fn context_method(mut self, name: &str) -> Self {
        self.methods.insert(
            name.to_string(),
            MethodMeta {
                returns_context: true,
            },
        );
        self
    }

    /// Declare a subscribable event
    pub fn event(mut self, name: &str) -> Self {
        self.events.insert(name.to_string());
        self
    }
}

/// The published surface of an attached context. Immutable once sent to a
/// peer; re-attaching produces a new id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    pub id: u64,
    /// Set for contexts originated by a `context_method` call; used to
    /// release the whole originated subtree when the parent detaches.
    pub parent_id: Option<u64>,
    pub name: String,
    pub properties: HashMap<String, PropertyMeta>,
    pub methods: HashMap<String, MethodMeta>,
    pub events: BTreeSet<String>,
}

impl Definition {
    pub fn new(id: u64, parent_id: Option<u64>, name: &str, caps: CapabilityDescriptor) -> Self {
        Self {
            id,
            parent_id,
            name: name.to_string(),
            properties: caps.properties,
            methods: caps.methods,
            events: caps.events,
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertyMeta> {
        self.properties.get(name)
    }

    pub fn method(&self, name: &str) -> Option<&MethodMeta> {
        self.methods.get(name)
    }

    pub fn has_event(&self, name: &str) -> bool {
        self.events.contains(name)
    }
}
