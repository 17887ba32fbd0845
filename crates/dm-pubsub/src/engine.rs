//! # The Engine
//!
//! Subscriber registry and fan-out. Registrations declare a mode
//! (publish, subscribe, or both) and get back a [`TopicHandle`] wired into
//! the network bridge through the engine's outgoing feed.
//!
//! ## Rebroadcast suppression
//!
//! Every emitted change carries a `sender` id. Only changes bearing the
//! engine's own local sender id are forwarded to the outgoing (to-wire)
//! feed; a network-origin change is re-emitted locally under
//! `net:<original sender>` and therefore never loops back onto the wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use dm_types::{epoch_millis, ChangeNotice, EventNotice, REMOTE_SENDER_PREFIX};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use crate::topic::{match_topics, MatchKind, TopicError, TopicFilter, TopicPath};
use crate::OUTGOING_CHANNEL_CAPACITY;

/// What a registration intends to do with its topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterMode {
    /// Emit only.
    Publish,
    /// Receive only.
    Subscribe,
    /// Both directions.
    PublishSubscribe,
}

impl RegisterMode {
    fn subscribes(self) -> bool {
        matches!(self, Self::Subscribe | Self::PublishSubscribe)
    }

    fn publishes(self) -> bool {
        matches!(self, Self::Publish | Self::PublishSubscribe)
    }
}

/// Options for [`PubSubEngine::register`].
#[derive(Debug, Clone)]
pub struct RegisterOptions {
    /// Topic path (publishers) or pattern (subscribers).
    pub topic: String,
    /// Declared direction.
    pub mode: RegisterMode,
    /// Receive updates published below the subscribed topic, projected
    /// down into an object keyed by the remaining segments.
    pub forward_child_data: bool,
    /// Receive updates published one level above the subscribed topic,
    /// projected up by extracting the final segment as a field.
    pub forward_parent_data: bool,
    /// Match by literal equality only; wildcard segments never match.
    pub match_without_wildcards: bool,
}

impl RegisterOptions {
    /// A plain subscriber with no forwarding.
    pub fn subscribe(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            mode: RegisterMode::Subscribe,
            forward_child_data: false,
            forward_parent_data: false,
            match_without_wildcards: false,
        }
    }

    /// A plain publisher.
    pub fn publish(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            mode: RegisterMode::Publish,
            forward_child_data: false,
            forward_parent_data: false,
            match_without_wildcards: false,
        }
    }

    /// Both directions on the same topic.
    pub fn publish_subscribe(topic: impl Into<String>) -> Self {
        Self {
            mode: RegisterMode::PublishSubscribe,
            ..Self::subscribe(topic)
        }
    }

    /// Enable child-data forwarding.
    #[must_use]
    pub fn with_child_forwarding(mut self) -> Self {
        self.forward_child_data = true;
        self
    }

    /// Enable parent-data forwarding.
    #[must_use]
    pub fn with_parent_forwarding(mut self) -> Self {
        self.forward_parent_data = true;
        self
    }
}

struct SubscriberEntry {
    filter: TopicFilter,
    forward_child_data: bool,
    forward_parent_data: bool,
    match_without_wildcards: bool,
    tx: mpsc::UnboundedSender<EventNotice>,
}

struct EngineState {
    subscribers: std::collections::HashMap<u64, SubscriberEntry>,
    next_id: u64,
}

/// Topic-pattern publish/subscribe engine.
pub struct PubSubEngine {
    local_sender: String,
    inner: RwLock<EngineState>,
    outgoing: broadcast::Sender<EventNotice>,
    disposed: AtomicBool,
}

impl PubSubEngine {
    /// Create an engine whose locally published changes carry
    /// `local_sender` on the wire.
    pub fn new(local_sender: impl Into<String>) -> Self {
        let (outgoing, _) = broadcast::channel(OUTGOING_CHANNEL_CAPACITY);
        Self {
            local_sender: local_sender.into(),
            inner: RwLock::new(EngineState {
                subscribers: std::collections::HashMap::new(),
                next_id: 0,
            }),
            outgoing,
            disposed: AtomicBool::new(false),
        }
    }

    /// The sender id attached to locally published changes.
    #[must_use]
    pub fn local_sender(&self) -> &str {
        &self.local_sender
    }

    /// Changes that should be carried to the network, in publish order.
    #[must_use]
    pub fn outgoing(&self) -> broadcast::Receiver<EventNotice> {
        self.outgoing.subscribe()
    }

    /// Register a publisher and/or subscriber.
    pub fn register(
        self: &Arc<Self>,
        options: RegisterOptions,
    ) -> Result<TopicHandle, TopicError> {
        // Validate the pattern up front, even for pure publishers.
        let filter = TopicFilter::parse(&options.topic)?;

        let (subscriber_id, rx) = if options.mode.subscribes() {
            let (tx, rx) = mpsc::unbounded_channel();
            let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
            let id = state.next_id;
            state.next_id += 1;
            state.subscribers.insert(
                id,
                SubscriberEntry {
                    filter,
                    forward_child_data: options.forward_child_data,
                    forward_parent_data: options.forward_parent_data,
                    match_without_wildcards: options.match_without_wildcards,
                    tx,
                },
            );
            debug!(topic = %options.topic, id, "Subscriber registered");
            (Some(id), Some(rx))
        } else {
            (None, None)
        };

        Ok(TopicHandle {
            engine: Arc::clone(self),
            topic: options.topic,
            publishes: options.mode.publishes(),
            subscriber_id,
            rx,
        })
    }

    /// Publish a local change. Fans out to matching subscribers and onto
    /// the outgoing feed.
    pub fn publish(&self, path: &str, data: Value, args: Vec<Value>, forced: bool) {
        let sender = self.local_sender.clone();
        self.publish_as(path, data, args, sender, forced, epoch_millis());
    }

    /// Re-emit a network-origin change locally.
    ///
    /// The change is delivered to local subscribers under a distinct
    /// internal sender id, so it is never forwarded back to the wire.
    pub fn apply_remote(&self, notice: EventNotice) {
        let EventNotice { change, args } = notice;
        let sender = format!("{REMOTE_SENDER_PREFIX}{}", change.sender);
        self.publish_as(
            &change.path,
            change.data,
            args,
            sender,
            change.forced,
            change.timestamp,
        );
    }

    fn publish_as(
        &self,
        path: &str,
        data: Value,
        args: Vec<Value>,
        sender: String,
        forced: bool,
        timestamp: u64,
    ) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        let parsed = match TopicPath::parse(path) {
            Ok(p) => p,
            Err(e) => {
                warn!(path, error = %e, "Dropping publish on malformed topic");
                return;
            }
        };

        let notice = EventNotice {
            change: ChangeNotice {
                path: path.to_string(),
                data,
                sender: sender.clone(),
                timestamp,
                forced,
            },
            args,
        };

        let mut dead = Vec::new();
        {
            let state = self.inner.read().unwrap_or_else(|e| e.into_inner());
            for (id, entry) in &state.subscribers {
                let Some(kind) =
                    match_topics(&entry.filter, &parsed, entry.match_without_wildcards)
                else {
                    continue;
                };
                let Some(projected) = project(&notice.change.data, &kind, entry) else {
                    continue;
                };
                let delivery = EventNotice {
                    change: ChangeNotice {
                        data: projected,
                        ..notice.change.clone()
                    },
                    args: notice.args.clone(),
                };
                if entry.tx.send(delivery).is_err() {
                    dead.push(*id);
                }
            }
        }
        if !dead.is_empty() {
            let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
            for id in dead {
                state.subscribers.remove(&id);
            }
        }

        // Only locally originated changes go to the wire.
        if notice.change.sender == self.local_sender {
            // Errors just mean nothing is bridging to a transport yet.
            let _ = self.outgoing.send(notice);
        }
    }

    fn unregister(&self, id: u64) {
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if state.subscribers.remove(&id).is_some() {
            debug!(id, "Subscriber unregistered");
        }
    }

    /// Number of live subscriber registrations.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .subscribers
            .len()
    }

    /// Drop every registration. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.inner.write().unwrap_or_else(|e| e.into_inner());
        state.subscribers.clear();
    }
}

/// Project the published value for one subscriber, or `None` when the
/// match kind requires a forwarding flag the subscriber did not set.
fn project(data: &Value, kind: &MatchKind, entry: &SubscriberEntry) -> Option<Value> {
    match kind {
        MatchKind::Direct => Some(data.clone()),
        MatchKind::ParentOfPublished { remainder } => {
            if !entry.forward_child_data {
                return None;
            }
            // Nest the value under the segments below the subscription,
            // innermost first: a/b/c/d seen from a/b becomes {"c":{"d":v}}.
            let mut value = data.clone();
            for segment in remainder.iter().rev() {
                let mut object = Map::new();
                object.insert(segment.clone(), value);
                value = Value::Object(object);
            }
            Some(value)
        }
        MatchKind::ChildOfPublished { segment } => {
            if !entry.forward_parent_data {
                return None;
            }
            Some(data.get(segment).cloned().unwrap_or(Value::Null))
        }
    }
}

/// Handle returned by [`PubSubEngine::register`].
///
/// Dropping the handle unregisters its subscription.
pub struct TopicHandle {
    engine: Arc<PubSubEngine>,
    topic: String,
    publishes: bool,
    subscriber_id: Option<u64>,
    rx: Option<mpsc::UnboundedReceiver<EventNotice>>,
}

impl TopicHandle {
    /// The registered topic.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Emit a value on this handle's topic.
    ///
    /// No-op (with a warning) when the handle was registered
    /// subscribe-only.
    pub fn emit(&self, data: Value) {
        self.emit_event(data, vec![]);
    }

    /// Emit a value with event arguments.
    pub fn emit_event(&self, data: Value, args: Vec<Value>) {
        if !self.publishes {
            warn!(topic = %self.topic, "emit on a subscribe-only handle ignored");
            return;
        }
        self.engine.publish(&self.topic, data, args, false);
    }

    /// Receive the next incremental change for this subscription.
    ///
    /// Returns `None` when the handle is publish-only or the engine was
    /// disposed.
    pub async fn recv(&mut self) -> Option<EventNotice> {
        self.rx.as_mut()?.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<EventNotice> {
        self.rx.as_mut()?.try_recv().ok()
    }

    /// Consume the handle into a stream of incremental changes.
    ///
    /// Publish-only handles yield an empty stream.
    #[must_use]
    pub fn into_stream(mut self) -> UnboundedReceiverStream<EventNotice> {
        match self.rx.take() {
            Some(rx) => UnboundedReceiverStream::new(rx),
            None => {
                let (_tx, rx) = mpsc::unbounded_channel();
                UnboundedReceiverStream::new(rx)
            }
        }
    }
}

impl Drop for TopicHandle {
    fn drop(&mut self) {
        if let Some(id) = self.subscriber_id {
            self.engine.unregister(id);
        }
    }
}
