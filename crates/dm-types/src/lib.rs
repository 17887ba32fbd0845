//! # Shared Types for Dispatch-Mesh
//!
//! Defines the vocabulary every subsystem speaks:
//!
//! - Identifiers (`DispatcherId`, `TaskId`)
//! - Peer status records and health states
//! - Service and instance descriptors
//! - The logical wire message catalogue (`WireMessage`)
//! - The cross-subsystem error taxonomy (`DispatchError`)
//!
//! The wire message model is a *logical* shape, not a serialization format:
//! transports serialize `WireMessage` however they like (the loopback
//! transport in `dispatcher-runtime` does not serialize at all).

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod errors;
pub mod ids;
pub mod instances;
pub mod messages;
pub mod services;
pub mod status;

// Re-export main types
pub use errors::DispatchError;
pub use ids::{DispatcherId, TaskId};
pub use instances::InstanceDescription;
pub use messages::{CallParam, ChangeNotice, EventNotice, RpcRequest, RpcResponse, WireMessage};
pub use services::{CallOptions, ServiceDescriptor, TargetSelector};
pub use status::{HealthState, PeerStatus};

/// Current protocol version for dispatcher messages.
pub const PROTOCOL_VERSION: u16 = 1;

/// Sender id used when a manager re-emits a network-origin change locally.
///
/// Rebroadcast suppression compares sender ids for equality; re-emitting
/// under this prefix keeps a remote change from bouncing back onto the wire.
pub const REMOTE_SENDER_PREFIX: &str = "net:";

/// Milliseconds since the Unix epoch, from the uncorrected local clock.
#[must_use]
pub fn epoch_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
