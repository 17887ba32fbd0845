//! # Dispatcher Runtime
//!
//! Wires the managers into one running dispatcher:
//!
//! - [`TransportBridge`] is the only thing the core asks of a transport:
//!   emit, a stream of inbound messages, a connected flag, dispose.
//! - [`DispatcherCore`] owns the managers, the inbound router task, the
//!   heartbeat and health-check timers, and the pubsub-to-wire pumps.
//! - [`RuntimeConfig`] is the TOML-loadable configuration surface.
//!
//! The in-process [`LoopbackNetwork`] transport exists for demos and
//! tests; production transports implement [`TransportBridge`] elsewhere.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod config;
pub mod core;
pub mod transport;

// Re-export main types
pub use config::{DispatcherSection, RpcSection, RuntimeConfig, RuntimeConfigError};
pub use self::core::DispatcherCore;
pub use transport::{LoopbackNetwork, LoopbackTransport, TransportBridge};
