//! # Instance Descriptions
//!
//! A distributed instance is an identifier-addressed stateful object hosted
//! by exactly one dispatcher and referenced by possibly many. The
//! description is the network-visible shape a wrapper is built from.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Network-visible description of one distributed instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDescription {
    /// Constructor type name (matches a `construct:<type>` service).
    pub type_name: String,
    /// Globally unique instance identifier.
    pub identifier: String,
    /// Constructor parameters the instance was created with.
    #[serde(default)]
    pub params: Value,
    /// Callable method names, forwarded as RPC calls by wrappers.
    #[serde(default)]
    pub methods: Vec<String>,
    /// Property names, mirrored through the data engine.
    #[serde(default)]
    pub properties: Vec<String>,
    /// Event names, mirrored through the event engine.
    #[serde(default)]
    pub events: Vec<String>,
}

impl InstanceDescription {
    /// Minimal description for requesting construction.
    pub fn request(type_name: impl Into<String>, identifier: impl Into<String>, params: Value) -> Self {
        Self {
            type_name: type_name.into(),
            identifier: identifier.into(),
            params,
            methods: vec![],
            properties: vec![],
            events: vec![],
        }
    }

    /// Topic under which one property of this instance is mirrored.
    #[must_use]
    pub fn property_topic(&self, property: &str) -> String {
        format!("instances/{}/properties/{}", self.identifier, property)
    }

    /// Topic under which one event of this instance is mirrored.
    #[must_use]
    pub fn event_topic(&self, event: &str) -> String {
        format!("instances/{}/events/{}", self.identifier, event)
    }
}
