//! # The Manager
//!
//! Peer table, health recomputation, election, and clock offset. Timer
//! driving lives in the runtime: a heartbeat task calls [`ConnectivityManager::heartbeat`]
//! every `send_alive_interval` and a maintenance task calls
//! [`ConnectivityManager::check_peers`] every `check_interval`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use dm_merge::MergeTable;
use dm_types::{epoch_millis, DispatcherId, HealthState, PeerStatus, WireMessage};
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ConnectivityConfig;

/// Capacity of the peer-change broadcast channel.
const CHANGE_CHANNEL_CAPACITY: usize = 64;

/// Peers that appeared or disappeared during one check tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeerChange {
    /// Newly discovered dispatcher ids.
    pub added: Vec<DispatcherId>,
    /// Removed dispatcher ids.
    pub removed: Vec<DispatcherId>,
}

impl PeerChange {
    /// True when nothing changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Static facts about the local dispatcher, carried in every heartbeat.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    /// Deployment environment label.
    pub env: String,
    /// Middleware version string.
    pub version: String,
    /// Plugin/capability tags.
    pub tags: Vec<String>,
}

impl Default for LocalIdentity {
    fn default() -> Self {
        Self {
            env: "dev".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            tags: Vec::new(),
        }
    }
}

struct PeerRecord {
    status: PeerStatus,
    last_seen: Instant,
}

struct ConnState {
    peers: HashMap<DispatcherId, PeerRecord>,
    dispatchers: MergeTable<PeerStatus>,
    /// Corrected-clock offset in milliseconds, set by `sync_time`.
    offset_ms: i64,
    /// Whether the local dispatcher pins mastership.
    master_forced: bool,
    /// True once the first heartbeat went out.
    ready: bool,
    disposed: bool,
}

/// Tracks peer liveness and elects a master.
pub struct ConnectivityManager {
    local_id: DispatcherId,
    identity: LocalIdentity,
    host: String,
    pid: u32,
    config: ConnectivityConfig,
    connected_since: u64,
    outbound: mpsc::UnboundedSender<WireMessage>,
    on_change: broadcast::Sender<PeerChange>,
    inner: Mutex<ConnState>,
}

impl ConnectivityManager {
    /// Create the manager and emit the discovery broadcast.
    pub fn new(
        local_id: DispatcherId,
        identity: LocalIdentity,
        config: ConnectivityConfig,
        outbound: mpsc::UnboundedSender<WireMessage>,
    ) -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        let (on_change, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);

        let manager = Self {
            local_id: local_id.clone(),
            identity,
            host,
            pid: std::process::id(),
            config,
            connected_since: epoch_millis(),
            outbound,
            on_change,
            inner: Mutex::new(ConnState {
                peers: HashMap::new(),
                dispatchers: MergeTable::new(),
                offset_ms: 0,
                master_forced: false,
                ready: false,
                disposed: false,
            }),
        };

        info!(dispatcher = %local_id, "Announcing dispatcher to the network");
        manager.send(WireMessage::Bonjour {
            dispatcher_id: local_id,
        });
        manager
    }

    /// The local dispatcher id.
    #[must_use]
    pub fn local_id(&self) -> &DispatcherId {
        &self.local_id
    }

    /// The configured thresholds.
    #[must_use]
    pub fn config(&self) -> &ConnectivityConfig {
        &self.config
    }

    /// Peer additions/removals, one message per check tick with changes.
    #[must_use]
    pub fn on_change(&self) -> broadcast::Receiver<PeerChange> {
        self.on_change.subscribe()
    }

    /// True once the first heartbeat has been sent.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.lock().ready
    }

    /// Route an inbound connectivity message. Non-connectivity messages
    /// are ignored.
    pub fn handle_message(&self, message: &WireMessage) {
        match message {
            WireMessage::Bonjour { dispatcher_id } if *dispatcher_id != self.local_id => {
                self.on_bonjour(dispatcher_id);
            }
            WireMessage::StatusChanged(status) if status.id != self.local_id => {
                self.on_status(status.clone());
            }
            _ => {}
        }
    }

    /// Send the local heartbeat and refresh the self entry.
    pub fn heartbeat(&self) {
        let status = self.local_status();
        {
            let mut state = self.lock();
            if state.disposed {
                return;
            }
            state.ready = true;
            Self::rebuild_view(&self.local_id, status.clone(), &mut state);
        }
        self.send(WireMessage::StatusChanged(status));
    }

    /// Recompute every peer's health and evict the long-dead.
    ///
    /// Call from a timer task at `check_interval`; the returned change is
    /// also broadcast on the `on_change` channel.
    pub fn check_peers(&self) -> PeerChange {
        let mut change = PeerChange::default();
        let now = Instant::now();
        {
            let mut state = self.lock();
            if state.disposed {
                return change;
            }

            let remove_after = self.config.remove;
            let expired: Vec<DispatcherId> = state
                .peers
                .iter()
                .filter(|(_, record)| now.duration_since(record.last_seen) >= remove_after)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &expired {
                state.peers.remove(id);
                warn!(peer = %id, "Peer removed after heartbeat grace period");
            }
            change.removed = expired;

            for record in state.peers.values_mut() {
                record.status.health =
                    self.health_for(now.duration_since(record.last_seen));
            }

            let status = self.local_status_locked(&state);
            Self::rebuild_view(&self.local_id, status, &mut state);
        }

        if !change.is_empty() {
            let _ = self.on_change.send(change.clone());
        }
        change
    }

    /// The current status record of one dispatcher (self included).
    #[must_use]
    pub fn peer(&self, id: &DispatcherId) -> Option<PeerStatus> {
        if *id == self.local_id {
            return Some(self.local_status());
        }
        self.lock().peers.get(id).map(|r| r.status.clone())
    }

    /// Status records of every known dispatcher, self included.
    #[must_use]
    pub fn peers(&self) -> Vec<PeerStatus> {
        let state = self.lock();
        let mut all: Vec<PeerStatus> = state.peers.values().map(|r| r.status.clone()).collect();
        all.push(self.local_status_locked(&state));
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Ids of every known dispatcher, self included.
    #[must_use]
    pub fn known_ids(&self) -> Vec<DispatcherId> {
        self.peers().into_iter().map(|s| s.id).collect()
    }

    /// Number of dispatchers in the merged status view. Only updated by
    /// heartbeats and health checks, so it can trail `known_ids` between
    /// ticks.
    #[must_use]
    pub fn view_count(&self) -> usize {
        self.lock().dispatchers.len()
    }

    /// The merged status record behind a dispatcher id, from the view.
    #[must_use]
    pub fn view_status(&self, id: &DispatcherId) -> Option<PeerStatus> {
        self.lock().dispatchers.get(id.as_str()).cloned()
    }

    /// The elected master, if any dispatcher is known.
    #[must_use]
    pub fn master(&self) -> Option<DispatcherId> {
        let candidates = self.peers();
        Self::elect(&candidates)
    }

    /// Whether the local dispatcher currently holds mastership.
    #[must_use]
    pub fn is_master(&self) -> bool {
        self.master().as_ref() == Some(&self.local_id)
    }

    /// Pin or unpin mastership on the local dispatcher. Propagated with
    /// the next heartbeat.
    pub fn force_master(&self, forced: bool) {
        self.lock().master_forced = forced;
        // Propagate immediately rather than waiting out the interval.
        self.heartbeat();
    }

    /// Adopt a remote clock reading: `offset = remote + half_rtt − local`.
    pub fn sync_time(&self, remote_timestamp: u64, half_round_trip: u64) {
        let local = epoch_millis() as i64;
        let offset = remote_timestamp as i64 + half_round_trip as i64 - local;
        debug!(offset_ms = offset, "Clock offset adjusted");
        self.lock().offset_ms = offset;
    }

    /// Milliseconds since epoch on the offset-corrected clock.
    #[must_use]
    pub fn now(&self) -> u64 {
        let offset = self.lock().offset_ms;
        (epoch_millis() as i64 + offset).max(0) as u64
    }

    /// The local dispatcher's own status, recomputed on demand.
    #[must_use]
    pub fn local_status(&self) -> PeerStatus {
        let state = self.lock();
        self.local_status_locked(&state)
    }

    /// Clear all peer state. Idempotent.
    pub fn dispose(&self) {
        let mut state = self.lock();
        if state.disposed {
            return;
        }
        state.disposed = true;
        state.peers.clear();
        state.dispatchers.dispose();
    }

    fn on_bonjour(&self, peer: &DispatcherId) {
        let known = self.lock().peers.contains_key(peer);
        if !known {
            debug!(peer = %peer, "Discovery broadcast from new peer, answering with status");
        }
        // Answer every bonjour; the sender is waiting to learn who exists.
        self.send(WireMessage::StatusChanged(self.local_status()));
    }

    fn on_status(&self, status: PeerStatus) {
        let id = status.id.clone();
        let added = {
            let mut state = self.lock();
            if state.disposed {
                return;
            }
            let added = !state.peers.contains_key(&id);
            state.peers.insert(
                id.clone(),
                PeerRecord {
                    status,
                    last_seen: Instant::now(),
                },
            );
            let local = self.local_status_locked(&state);
            Self::rebuild_view(&self.local_id, local, &mut state);
            added
        };
        if added {
            info!(peer = %id, "Peer discovered");
            let _ = self.on_change.send(PeerChange {
                added: vec![id],
                removed: vec![],
            });
        }
    }

    fn local_status_locked(&self, state: &ConnState) -> PeerStatus {
        let now = (epoch_millis() as i64 + state.offset_ms).max(0) as u64;
        let mut status = PeerStatus {
            id: self.local_id.clone(),
            timestamp: now,
            connected_since: self.connected_since,
            health: HealthState::Healthy,
            is_master: false,
            is_master_forced: state.master_forced,
            env: self.identity.env.clone(),
            version: self.identity.version.clone(),
            host: self.host.clone(),
            pid: self.pid,
            tags: self.identity.tags.clone(),
        };
        let mut candidates: Vec<PeerStatus> =
            state.peers.values().map(|r| r.status.clone()).collect();
        candidates.push(status.clone());
        status.is_master = Self::elect(&candidates).as_ref() == Some(&self.local_id);
        status
    }

    fn health_for(&self, age: std::time::Duration) -> HealthState {
        if age >= self.config.dead {
            HealthState::Dead
        } else if age >= self.config.warn {
            HealthState::Warning
        } else if age >= self.config.slow {
            HealthState::Slow
        } else {
            HealthState::Healthy
        }
    }

    /// Pick the master from a candidate set: forced peers pin the role
    /// (lowest id if several force it); otherwise greatest uptime wins,
    /// tie-break lowest id. Dead peers never win.
    fn elect(candidates: &[PeerStatus]) -> Option<DispatcherId> {
        let alive: Vec<&PeerStatus> = candidates
            .iter()
            .filter(|s| s.health != HealthState::Dead)
            .collect();

        if let Some(forced) = alive
            .iter()
            .filter(|s| s.is_master_forced)
            .min_by(|a, b| a.id.cmp(&b.id))
        {
            return Some(forced.id.clone());
        }

        alive
            .iter()
            .min_by(|a, b| {
                a.connected_since
                    .cmp(&b.connected_since)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|s| s.id.clone())
    }

    fn rebuild_view(local_id: &DispatcherId, local: PeerStatus, state: &mut ConnState) {
        let mut sources = BTreeMap::new();
        sources.insert(
            local_id.clone(),
            HashMap::from([(local_id.to_string(), local)]),
        );
        for (id, record) in &state.peers {
            sources.insert(
                id.clone(),
                HashMap::from([(id.to_string(), record.status.clone())]),
            );
        }
        state.dispatchers.update(sources);
    }

    fn send(&self, message: WireMessage) {
        if self.outbound.send(message).is_err() {
            debug!("Outbound channel closed, dropping connectivity message");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ConnState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
