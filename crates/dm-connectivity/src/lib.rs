//! # Connectivity Manager
//!
//! Tracks local and peer liveness via heartbeats, derives per-peer health
//! from heartbeat age, elects a master, and estimates clock offsets.
//!
//! ## Peer lifecycle
//!
//! ```text
//! Bonjour ──→ StatusChanged (first) ──→ Healthy
//!                                          │ no heartbeat ≥ slow
//!                                          ▼
//!                                        Slow ──→ Warning ──→ Dead ──→ removed
//! ```
//!
//! Health is driven purely by elapsed time since the last received
//! heartbeat; the periodic check tick recomputes every peer and evicts
//! those stuck at Dead past the `remove` grace period. Removal feeds the
//! `on_change` channel so the rpc and instance managers can purge state
//! tied to the departed peer.
//!
//! ## Master election
//!
//! If no peer forces mastership, the peer with the greatest uptime wins
//! (tie-break: lowest id). A forced master pins the role regardless of
//! uptime; the flag travels in heartbeats so all peers converge.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod manager;

// Re-export main types
pub use config::{ConnectivityConfig, ConnectivityConfigError};
pub use manager::{ConnectivityManager, LocalIdentity, PeerChange};
