//! # Connectivity Configuration
//!
//! Heartbeat and health thresholds. All thresholds are measured from the
//! last received heartbeat and must respect the ordering
//! `send_alive_interval ≤ check_interval ≤ slow ≤ warn ≤ dead ≤ remove`,
//! otherwise the state machine can skip states or evict live peers.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Errors from validating a [`ConnectivityConfig`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectivityConfigError {
    /// An interval ordering constraint does not hold.
    #[error("Invalid threshold ordering: {0} must not exceed {1}")]
    Ordering(&'static str, &'static str),

    /// A zero interval would spin the timer loop.
    #[error("Interval must be non-zero: {0}")]
    Zero(&'static str),
}

/// Heartbeat/health thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    /// How often the local status heartbeat is sent.
    #[serde(with = "millis")]
    pub send_alive_interval: Duration,
    /// How often peer health is recomputed.
    #[serde(with = "millis")]
    pub check_interval: Duration,
    /// Heartbeat age at which a peer turns Slow.
    #[serde(with = "millis")]
    pub slow: Duration,
    /// Heartbeat age at which a peer turns Warning.
    #[serde(with = "millis")]
    pub warn: Duration,
    /// Heartbeat age at which a peer turns Dead.
    #[serde(with = "millis")]
    pub dead: Duration,
    /// Heartbeat age at which a Dead peer is removed entirely.
    #[serde(with = "millis")]
    pub remove: Duration,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            send_alive_interval: Duration::from_millis(500),
            check_interval: Duration::from_millis(500),
            slow: Duration::from_millis(1_000),
            warn: Duration::from_millis(2_000),
            dead: Duration::from_millis(5_000),
            remove: Duration::from_millis(10_000),
        }
    }
}

impl ConnectivityConfig {
    /// Enforce the interval ordering constraints.
    pub fn validate(&self) -> Result<(), ConnectivityConfigError> {
        if self.send_alive_interval.is_zero() {
            return Err(ConnectivityConfigError::Zero("send_alive_interval"));
        }
        if self.check_interval.is_zero() {
            return Err(ConnectivityConfigError::Zero("check_interval"));
        }
        let ordered: [(&'static str, Duration, &'static str, Duration); 5] = [
            (
                "send_alive_interval",
                self.send_alive_interval,
                "check_interval",
                self.check_interval,
            ),
            ("check_interval", self.check_interval, "slow", self.slow),
            ("slow", self.slow, "warn", self.warn),
            ("warn", self.warn, "dead", self.dead),
            ("dead", self.dead, "remove", self.remove),
        ];
        for (a_name, a, b_name, b) in ordered {
            if a > b {
                return Err(ConnectivityConfigError::Ordering(a_name, b_name));
            }
        }
        Ok(())
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
