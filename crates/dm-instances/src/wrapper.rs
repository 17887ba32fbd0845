//! # Consumer-Side Wrappers
//!
//! A wrapper is the local face of a (possibly remote) instance: an explicit
//! method map whose entries forward over `call:<identifier>`, plus property
//! reads from the data engine mirror and event subscriptions on the event
//! engine. Per-type generators can shape the map; the `"*"` generator
//! builds it one-to-one from the instance description.

use std::collections::HashMap;
use std::sync::Arc;

use dm_pubsub::{DataEngine, PubSubEngine, RegisterOptions, TopicHandle};
use dm_rpc::RpcManager;
use dm_types::{CallOptions, DispatchError, InstanceDescription};
use serde_json::{json, Value};

/// Shared manager handles a generator builds wrappers from.
#[derive(Clone)]
pub struct WrapperParts {
    /// Call forwarding.
    pub rpc: Arc<RpcManager>,
    /// Property mirror.
    pub data: Arc<DataEngine>,
    /// Event mirror.
    pub events: Arc<PubSubEngine>,
}

struct MethodForwarder {
    rpc: Arc<RpcManager>,
    service: String,
    method: String,
}

impl MethodForwarder {
    async fn invoke(&self, args: Vec<Value>) -> Result<Value, DispatchError> {
        let mut params = vec![json!(self.method)];
        params.extend(args);
        self.rpc
            .perform_call(&self.service, params, CallOptions::default())
            .await
            .map_err(|error| match error {
                DispatchError::Handler(message) => DispatchError::from_wire(&message),
                other => other,
            })
    }
}

/// Local proxy for one distributed instance.
pub struct InstanceClient {
    description: InstanceDescription,
    methods: HashMap<String, MethodForwarder>,
    data: Arc<DataEngine>,
    events: Arc<PubSubEngine>,
}

impl std::fmt::Debug for InstanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceClient")
            .field("description", &self.description)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl InstanceClient {
    /// The description the wrapper was built from.
    #[must_use]
    pub fn description(&self) -> &InstanceDescription {
        &self.description
    }

    /// The instance identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.description.identifier
    }

    /// Invoke a method on the hosting dispatcher and wait for the result.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, DispatchError> {
        let Some(forwarder) = self.methods.get(method) else {
            return Err(DispatchError::ServiceNotFound(format!(
                "{}::{}",
                self.description.identifier, method
            )));
        };
        forwarder.invoke(args).await
    }

    /// Last mirrored value of a property, `Null` until the host pushed one.
    pub fn property(&self, property: &str) -> Result<Value, DispatchError> {
        if !self.description.properties.iter().any(|p| p == property) {
            return Err(DispatchError::ServiceNotFound(format!(
                "{}::{}",
                self.description.identifier, property
            )));
        }
        Ok(self
            .data
            .pull_data(&self.description.property_topic(property), Value::Null))
    }

    /// Subscribe to one of the instance's events.
    pub fn on_event(&self, event: &str) -> Result<TopicHandle, DispatchError> {
        if !self.description.events.iter().any(|e| e == event) {
            return Err(DispatchError::ServiceNotFound(format!(
                "{}::{}",
                self.description.identifier, event
            )));
        }
        self.events
            .register(RegisterOptions::subscribe(self.description.event_topic(event)))
            .map_err(|error| DispatchError::Handler(error.to_string()))
    }
}

/// Builds an [`InstanceClient`] for one constructor type.
pub trait WrapperGenerator: Send + Sync {
    /// Wrap a freshly constructed instance.
    fn wrap(&self, description: InstanceDescription, parts: &WrapperParts) -> InstanceClient;
}

/// The `"*"` fallback: one forwarding entry per described method.
pub struct GenericWrapper;

impl WrapperGenerator for GenericWrapper {
    fn wrap(&self, description: InstanceDescription, parts: &WrapperParts) -> InstanceClient {
        let service = format!("call:{}", description.identifier);
        let methods = description
            .methods
            .iter()
            .map(|method| {
                (
                    method.clone(),
                    MethodForwarder {
                        rpc: Arc::clone(&parts.rpc),
                        service: service.clone(),
                        method: method.clone(),
                    },
                )
            })
            .collect();
        InstanceClient {
            description,
            methods,
            data: Arc::clone(&parts.data),
            events: Arc::clone(&parts.events),
        }
    }
}
