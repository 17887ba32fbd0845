//! # Transport Bridge
//!
//! The core-to-transport contract plus an in-process loopback
//! implementation. A transport carries [`WireMessage`]s between
//! dispatchers; the core never sees addresses, sockets or brokers.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dm_types::{DispatchError, WireMessage};
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of each attached transport's inbound channel.
const INCOMING_CHANNEL_CAPACITY: usize = 1024;

/// Everything the dispatcher core requires from a transport adapter.
#[async_trait]
pub trait TransportBridge: Send + Sync {
    /// Broadcast one message to every other dispatcher on the transport.
    async fn emit(&self, message: WireMessage) -> Result<(), DispatchError>;

    /// Subscribe to inbound messages. Own broadcasts are never echoed.
    fn incoming(&self) -> broadcast::Receiver<WireMessage>;

    /// Whether the transport currently carries traffic.
    fn connected(&self) -> bool;

    /// Detach from the medium. Idempotent.
    async fn dispose(&self);
}

/// In-process hub connecting loopback transports.
pub struct LoopbackNetwork {
    attached: Mutex<Vec<(u64, broadcast::Sender<WireMessage>)>>,
    next_id: AtomicU64,
}

impl LoopbackNetwork {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            attached: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        })
    }

    /// Attach one endpoint. Connected until disposed.
    pub fn attach(self: &Arc<Self>) -> Arc<LoopbackTransport> {
        let (tx, _) = broadcast::channel(INCOMING_CHANNEL_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.attached
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, tx.clone()));
        Arc::new(LoopbackTransport {
            id,
            network: Arc::clone(self),
            incoming: tx,
            connected: AtomicBool::new(true),
        })
    }

    /// Number of currently attached endpoints.
    #[must_use]
    pub fn endpoint_count(&self) -> usize {
        self.attached.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn deliver(&self, from: u64, message: &WireMessage) {
        let attached = self.attached.lock().unwrap_or_else(|e| e.into_inner());
        for (id, tx) in attached.iter() {
            if *id == from {
                continue;
            }
            if tx.send(message.clone()).is_err() {
                debug!(endpoint = id, "Loopback endpoint has no listener");
            }
        }
    }

    fn detach(&self, id: u64) {
        self.attached
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(endpoint, _)| *endpoint != id);
    }
}

/// One endpoint on a [`LoopbackNetwork`].
pub struct LoopbackTransport {
    id: u64,
    network: Arc<LoopbackNetwork>,
    incoming: broadcast::Sender<WireMessage>,
    connected: AtomicBool,
}

#[async_trait]
impl TransportBridge for LoopbackTransport {
    async fn emit(&self, message: WireMessage) -> Result<(), DispatchError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DispatchError::Transport("transport disposed".to_string()));
        }
        self.network.deliver(self.id, &message);
        Ok(())
    }

    fn incoming(&self) -> broadcast::Receiver<WireMessage> {
        self.incoming.subscribe()
    }

    fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn dispose(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.network.detach(self.id);
        }
    }
}
