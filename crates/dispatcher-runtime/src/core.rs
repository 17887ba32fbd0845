//! # Dispatcher Core
//!
//! Instantiates the managers, pumps messages between them and the
//! transport, and drives the maintenance timers. One core per process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dm_connectivity::ConnectivityManager;
use dm_instances::InstanceManager;
use dm_pubsub::{DataEngine, PubSubEngine};
use dm_rpc::RpcManager;
use dm_types::{CallOptions, DispatchError, DispatcherId, WireMessage};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::transport::TransportBridge;

/// One running dispatcher: managers, router and timers.
pub struct DispatcherCore {
    id: DispatcherId,
    default_timeout_ms: u64,
    connectivity: Arc<ConnectivityManager>,
    rpc: Arc<RpcManager>,
    instances: Arc<InstanceManager>,
    data: Arc<DataEngine>,
    events: Arc<PubSubEngine>,
    transport: Arc<dyn TransportBridge>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    disposed: AtomicBool,
}

impl DispatcherCore {
    /// Wire the managers onto `transport` and start the background tasks.
    pub fn start(
        config: &RuntimeConfig,
        transport: Arc<dyn TransportBridge>,
    ) -> Result<Arc<Self>, crate::config::RuntimeConfigError> {
        config.validate()?;
        let id = config.dispatcher_id();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let connectivity = Arc::new(ConnectivityManager::new(
            id.clone(),
            config.identity(),
            config.connectivity.clone(),
            outbound_tx.clone(),
        ));
        let rpc = RpcManager::new(Arc::clone(&connectivity), outbound_tx.clone());
        let data = Arc::new(DataEngine::new(id.as_str()));
        let events = Arc::new(PubSubEngine::new(id.as_str()));
        let instances = InstanceManager::new(
            Arc::clone(&rpc),
            Arc::clone(&data),
            Arc::clone(&events),
            outbound_tx,
        );

        let core = Arc::new(Self {
            id: id.clone(),
            default_timeout_ms: config.rpc.default_timeout_ms,
            connectivity,
            rpc,
            instances,
            data,
            events,
            transport,
            tasks: Mutex::new(Vec::new()),
            disposed: AtomicBool::new(false),
        });

        let mut tasks = vec![
            core.spawn_outbound_pump(outbound_rx),
            core.spawn_inbound_router(),
            core.spawn_peer_change_listener(),
            core.spawn_heartbeat_timer(),
            core.spawn_check_timer(),
            core.spawn_event_pump(),
            core.spawn_data_pump(),
        ];
        core.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .append(&mut tasks);
        info!(dispatcher = %id, "Dispatcher core started");
        Ok(core)
    }

    /// The local dispatcher id.
    #[must_use]
    pub fn id(&self) -> &DispatcherId {
        &self.id
    }

    /// Peer discovery and health.
    #[must_use]
    pub fn connectivity(&self) -> &Arc<ConnectivityManager> {
        &self.connectivity
    }

    /// Service registry and remote calls.
    #[must_use]
    pub fn rpc(&self) -> &Arc<RpcManager> {
        &self.rpc
    }

    /// Distributed object instances.
    #[must_use]
    pub fn instances(&self) -> &Arc<InstanceManager> {
        &self.instances
    }

    /// Retained key/value state.
    #[must_use]
    pub fn data(&self) -> &Arc<DataEngine> {
        &self.data
    }

    /// Fire-and-forget events.
    #[must_use]
    pub fn events(&self) -> &Arc<PubSubEngine> {
        &self.events
    }

    /// Issue a remote call with the configured default timeout.
    pub async fn call(&self, service: &str, params: Vec<Value>) -> Result<Value, DispatchError> {
        self.rpc
            .perform_call(
                service,
                params,
                CallOptions::with_timeout(self.default_timeout_ms),
            )
            .await
    }

    /// True once the transport carries traffic and the first heartbeat
    /// has been sent.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.transport.connected() && self.connectivity.ready() && !self.disposed.load(Ordering::SeqCst)
    }

    /// Tear everything down, children before parents. Idempotent.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(dispatcher = %self.id, "Dispatcher core shutting down");
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for task in tasks {
            task.abort();
        }
        self.instances.dispose().await;
        self.rpc.dispose();
        self.data.dispose();
        self.events.dispose();
        self.connectivity.dispose();
        self.transport.dispose().await;
    }

    fn spawn_outbound_pump(
        self: &Arc<Self>,
        mut outbound: mpsc::UnboundedReceiver<WireMessage>,
    ) -> JoinHandle<()> {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                if let Err(error) = core.transport.emit(message).await {
                    warn!(error = %error, "Transport rejected outbound message");
                }
            }
        })
    }

    fn spawn_inbound_router(self: &Arc<Self>) -> JoinHandle<()> {
        let core = Arc::clone(self);
        let mut incoming = core.transport.incoming();
        tokio::spawn(async move {
            loop {
                match incoming.recv().await {
                    Ok(message) => core.route(message),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Inbound channel lagged, messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Fan one inbound message out to the managers that care about it.
    fn route(self: &Arc<Self>, message: WireMessage) {
        match message {
            WireMessage::DataChanged(notice) => {
                debug!(path = %notice.path, "Remote data change");
                self.data.apply_remote(notice);
            }
            WireMessage::Event(notice) => self.events.apply_remote(notice),
            other => {
                self.connectivity.handle_message(&other);
                self.instances.handle_message(&other);
                self.rpc.handle_message(other);
            }
        }
    }

    fn spawn_peer_change_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let core = Arc::clone(self);
        let mut changes = core.connectivity.on_change();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(change) => {
                        if !change.removed.is_empty() {
                            info!(removed = change.removed.len(), "Peers removed");
                        }
                        core.rpc.on_peers_changed(&change);
                        core.instances.on_peers_changed(&change).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Peer change feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn spawn_heartbeat_timer(self: &Arc<Self>) -> JoinHandle<()> {
        let core = Arc::clone(self);
        let period = core.connectivity.config().send_alive_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                core.connectivity.heartbeat();
            }
        })
    }

    fn spawn_check_timer(self: &Arc<Self>) -> JoinHandle<()> {
        let core = Arc::clone(self);
        let period = core.connectivity.config().check_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                core.connectivity.check_peers();
            }
        })
    }

    fn spawn_event_pump(self: &Arc<Self>) -> JoinHandle<()> {
        let core = Arc::clone(self);
        let mut outgoing = core.events.outgoing();
        tokio::spawn(async move {
            loop {
                match outgoing.recv().await {
                    Ok(notice) => {
                        if core.transport.emit(WireMessage::Event(notice)).await.is_err() {
                            debug!("Transport rejected event");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Event feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn spawn_data_pump(self: &Arc<Self>) -> JoinHandle<()> {
        let core = Arc::clone(self);
        let mut outgoing = core.data.outgoing();
        tokio::spawn(async move {
            loop {
                match outgoing.recv().await {
                    Ok(notice) => {
                        let message = WireMessage::DataChanged(notice.change);
                        if core.transport.emit(message).await.is_err() {
                            debug!("Transport rejected data change");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Data feed lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}
