//! # Test Fixtures
//!
//! A mesh of dispatcher cores wired to one in-process loopback hub, with
//! thresholds shrunk so paused-clock tests settle in simulated
//! milliseconds.

use std::sync::Arc;
use std::time::Duration;

use dispatcher_runtime::config::{DispatcherSection, RuntimeConfig};
use dispatcher_runtime::{DispatcherCore, LoopbackNetwork};
use dm_connectivity::ConnectivityConfig;
use dm_types::DispatcherId;

/// Heartbeat fast enough that one [`settle`] covers several rounds.
pub fn fast_config(id: &str) -> RuntimeConfig {
    RuntimeConfig {
        dispatcher: DispatcherSection {
            id: Some(id.to_string()),
            ..DispatcherSection::default()
        },
        connectivity: ConnectivityConfig {
            send_alive_interval: Duration::from_millis(50),
            check_interval: Duration::from_millis(50),
            slow: Duration::from_millis(200),
            warn: Duration::from_millis(400),
            dead: Duration::from_millis(800),
            remove: Duration::from_millis(1_600),
        },
        ..RuntimeConfig::default()
    }
}

/// A set of cores sharing one loopback hub.
pub struct TestMesh {
    pub network: Arc<LoopbackNetwork>,
    pub cores: Vec<Arc<DispatcherCore>>,
}

impl TestMesh {
    /// Start one core per id and let discovery settle.
    pub async fn start(ids: &[&str]) -> Self {
        Self::start_with(ids, fast_config).await
    }

    /// Start one core per id with a custom per-id configuration.
    pub async fn start_with(ids: &[&str], config: fn(&str) -> RuntimeConfig) -> Self {
        let network = LoopbackNetwork::new();
        let cores = ids
            .iter()
            .map(|id| {
                let core = DispatcherCore::start(&config(id), network.attach())
                    .expect("core starts with valid test config");
                // Uptime is wall-clock; keep start order observable in
                // `connected_since` even under a paused tokio clock.
                std::thread::sleep(Duration::from_millis(2));
                core
            })
            .collect();
        let mesh = Self { network, cores };
        settle(200).await;
        mesh
    }

    /// The core with the given dispatcher id.
    pub fn core(&self, id: &str) -> &Arc<DispatcherCore> {
        self.cores
            .iter()
            .find(|core| core.id() == &DispatcherId::new(id))
            .expect("unknown core id")
    }

    /// Dispose every core.
    pub async fn shutdown(self) {
        for core in self.cores {
            core.dispose().await;
        }
    }
}

/// Advance the (paused) clock and let every spawned task catch up.
pub async fn settle(millis: u64) {
    tokio::time::sleep(Duration::from_millis(millis)).await;
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
