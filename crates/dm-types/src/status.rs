//! # Peer Status
//!
//! The record each dispatcher broadcasts about itself in every heartbeat,
//! and the health state machine derived from heartbeat age.

use crate::ids::DispatcherId;
use serde::{Deserialize, Serialize};

/// Health of a tracked peer, derived purely from elapsed time since its
/// last heartbeat.
///
/// Transitions: `Healthy → Slow → Warning → Dead → (removed)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    /// Heartbeats arriving on schedule.
    Healthy,
    /// Last heartbeat older than the `slow` threshold.
    Slow,
    /// Last heartbeat older than the `warn` threshold.
    Warning,
    /// Last heartbeat older than the `dead` threshold; peer is presumed gone
    /// but kept visible until the `remove` grace period expires.
    Dead,
}

/// Full status record of one dispatcher.
///
/// Created on first heartbeat from a peer, refreshed on every subsequent
/// heartbeat, and removed after the configured grace period with none.
/// The local dispatcher's own status is recomputed on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerStatus {
    /// Dispatcher id.
    pub id: DispatcherId,
    /// Sender-clock timestamp of this record, milliseconds since epoch.
    pub timestamp: u64,
    /// When this dispatcher came up, milliseconds since epoch.
    pub connected_since: u64,
    /// Derived health state.
    pub health: HealthState,
    /// Whether this peer is the elected master.
    pub is_master: bool,
    /// Whether mastership is pinned regardless of uptime.
    pub is_master_forced: bool,
    /// Deployment environment label (e.g. "dev", "prod").
    pub env: String,
    /// Middleware version string.
    pub version: String,
    /// Hostname of the machine running this dispatcher.
    pub host: String,
    /// Operating-system process id.
    pub pid: u32,
    /// Free-form plugin/capability tags.
    pub tags: Vec<String>,
}

impl PeerStatus {
    /// Uptime in milliseconds relative to `now` (sender clock domain).
    ///
    /// Saturates to zero when clocks disagree enough that `connected_since`
    /// lies in the future.
    #[must_use]
    pub fn up_time(&self, now: u64) -> u64 {
        now.saturating_sub(self.connected_since)
    }
}
