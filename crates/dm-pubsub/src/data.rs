//! # Data Variant
//!
//! The data engine behaves exactly like the event engine but additionally
//! retains the last-known value per topic path, so late joiners can pull
//! current state instead of waiting for the next push.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use dm_types::{ChangeNotice, EventNotice};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::engine::{PubSubEngine, RegisterOptions, TopicHandle};
use crate::topic::TopicError;

/// Pub/sub engine with a retained-value store.
pub struct DataEngine {
    engine: Arc<PubSubEngine>,
    retained: RwLock<HashMap<String, Value>>,
}

impl DataEngine {
    /// Create a data engine publishing under `local_sender`.
    pub fn new(local_sender: impl Into<String>) -> Self {
        Self {
            engine: Arc::new(PubSubEngine::new(local_sender)),
            retained: RwLock::new(HashMap::new()),
        }
    }

    /// Register a publisher/subscriber; identical to the event engine.
    pub fn register(&self, options: RegisterOptions) -> Result<TopicHandle, TopicError> {
        self.engine.register(options)
    }

    /// Update the retained value and fan out exactly like an emit.
    pub fn push_data(&self, path: &str, value: Value) {
        self.retained
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), value.clone());
        self.engine.publish(path, value, vec![], false);
    }

    /// A copy of the current value at `path`, or `default` when none was
    /// ever pushed.
    #[must_use]
    pub fn pull_data(&self, path: &str, default: Value) -> Value {
        self.retained
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(path)
            .cloned()
            .unwrap_or(default)
    }

    /// Apply a change that arrived from the network: retain, then re-emit
    /// locally under the internal remote sender id.
    pub fn apply_remote(&self, notice: ChangeNotice) {
        self.retained
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(notice.path.clone(), notice.data.clone());
        self.engine.apply_remote(EventNotice {
            change: notice,
            args: vec![],
        });
    }

    /// Changes destined for the transport bridge.
    #[must_use]
    pub fn outgoing(&self) -> broadcast::Receiver<EventNotice> {
        self.engine.outgoing()
    }

    /// Number of live subscriber registrations.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.engine.subscriber_count()
    }

    /// Drop subscriptions and the retained store. Idempotent.
    pub fn dispose(&self) {
        self.engine.dispose();
        self.retained
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}
