//! # Service Descriptors and Call Options
//!
//! A service is a named, remotely callable function. The descriptor is what
//! the registering dispatcher shares with the network; the handler itself
//! never leaves the owning process.

use crate::ids::DispatcherId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Strategy for choosing which peer executes a call when several provide
/// the same service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetSelector {
    /// Any provider (deterministically: the lowest dispatcher id).
    #[default]
    First,
    /// Exact dispatcher id match (`CallOptions::target`).
    Dispatcher,
    /// A provider on the same host as the caller.
    Host,
    /// The elected master.
    Master,
    /// Lowest CPU load. Load measurement is not wired up; resolves like
    /// `First` until it is.
    CpuUsage,
    /// Most free memory. Same stub behavior as `CpuUsage`.
    FreeRam,
}

/// Per-call and per-service options.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CallOptions {
    /// Timeout in milliseconds; `0` disables the timeout timer.
    #[serde(default)]
    pub timeout_ms: u64,
    /// Target selection strategy.
    #[serde(default)]
    pub selector: TargetSelector,
    /// Selector argument: the exact dispatcher for `Dispatcher`, ignored
    /// otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<DispatcherId>,
}

impl CallOptions {
    /// Options with a timeout and default selection.
    #[must_use]
    pub fn with_timeout(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            ..Self::default()
        }
    }

    /// Options pinning the call to one dispatcher.
    #[must_use]
    pub fn on_dispatcher(target: DispatcherId) -> Self {
        Self {
            selector: TargetSelector::Dispatcher,
            target: Some(target),
            ..Self::default()
        }
    }

    /// True when no explicit selection policy was configured, so a sole
    /// provider can be taken directly.
    #[must_use]
    pub fn is_default_selection(&self) -> bool {
        self.selector == TargetSelector::First && self.target.is_none()
    }
}

/// Network-visible description of a registered service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// Service id (globally meaningful name, e.g. `"math/add"` or
    /// `"construct:counter"`).
    pub id: String,
    /// Input schema, free-form JSON (informational).
    #[serde(default)]
    pub input_schema: Value,
    /// Output schema, free-form JSON (informational).
    #[serde(default)]
    pub output_schema: Value,
    /// Default call options for this service.
    #[serde(default)]
    pub options: CallOptions,
}

impl ServiceDescriptor {
    /// Descriptor with empty schemas and default options.
    pub fn named(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            input_schema: Value::Null,
            output_schema: Value::Null,
            options: CallOptions::default(),
        }
    }
}
