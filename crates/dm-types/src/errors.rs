//! # Error Taxonomy
//!
//! One error enum shared by every manager. Registration-time failures are
//! returned synchronously; call-time failures travel through the task
//! future; malformed inbound messages are logged and dropped by the
//! receiving manager, never surfaced as a crash.

use crate::ids::DispatcherId;
use thiserror::Error;

/// Errors surfaced by the dispatcher core.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// No dispatcher currently provides the named service.
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// No `construct:<type>` service exists for the requested type.
    #[error("No constructor registered for type: {0}")]
    ConstructorNotFound(String),

    /// Service id or instance identifier already registered by someone else.
    #[error("Duplicate registration: {0}")]
    DuplicateRegistration(String),

    /// A placement constraint rejected every candidate peer.
    #[error("No peer satisfies placement constraint for {service}: {reason}")]
    AssignmentInvalid {
        /// The service the call was aimed at.
        service: String,
        /// Why no candidate was acceptable.
        reason: String,
    },

    /// The call exceeded its configured timeout.
    #[error("Call timed out after {0} ms")]
    Timeout(u64),

    /// The task was explicitly cancelled.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// The target dispatcher vanished mid-call.
    #[error("Peer removed: {0}")]
    PeerRemoved(DispatcherId),

    /// Concurrent instance creation with differing parameters for the
    /// same identifier.
    #[error("Different parameters for same identifier: {0}")]
    ParameterMismatch(String),

    /// The transport bridge refused or lost the message.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote handler returned an error.
    #[error("Handler error: {0}")]
    Handler(String),
}

impl DispatchError {
    /// Encode for an `RpcResponse::error` field.
    #[must_use]
    pub fn to_wire(&self) -> String {
        self.to_string()
    }

    /// Recover a typed error from an `RpcResponse::error` field. Messages
    /// outside the taxonomy come back as [`DispatchError::Handler`].
    #[must_use]
    pub fn from_wire(message: &str) -> Self {
        if let Some(rest) = message.strip_prefix("Service not found: ") {
            return Self::ServiceNotFound(rest.to_string());
        }
        if let Some(rest) = message.strip_prefix("No constructor registered for type: ") {
            return Self::ConstructorNotFound(rest.to_string());
        }
        if let Some(rest) = message.strip_prefix("Duplicate registration: ") {
            return Self::DuplicateRegistration(rest.to_string());
        }
        if let Some(rest) = message.strip_prefix("Different parameters for same identifier: ") {
            return Self::ParameterMismatch(rest.to_string());
        }
        if let Some(rest) = message.strip_prefix("Cancelled: ") {
            return Self::Cancelled(rest.to_string());
        }
        if let Some(rest) = message.strip_prefix("Peer removed: ") {
            return Self::PeerRemoved(DispatcherId::new(rest));
        }
        if let Some(ms) = message
            .strip_prefix("Call timed out after ")
            .and_then(|rest| rest.strip_suffix(" ms"))
            .and_then(|ms| ms.parse().ok())
        {
            return Self::Timeout(ms);
        }
        Self::Handler(message.to_string())
    }
}
