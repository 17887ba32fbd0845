//! # Runtime Configuration
//!
//! Unified configuration for one dispatcher process, loadable from TOML.
//! Every field has a sane default so an empty file (or none at all) yields
//! a working dispatcher with a generated id.

use std::path::Path;

use dm_connectivity::{ConnectivityConfig, ConnectivityConfigError, LocalIdentity};
use dm_types::DispatcherId;
use serde::Deserialize;
use thiserror::Error;

/// Errors from loading or validating a [`RuntimeConfig`].
#[derive(Debug, Error)]
pub enum RuntimeConfigError {
    /// The file could not be read.
    #[error("Cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid TOML for this schema.
    #[error("Cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The connectivity thresholds are inconsistent.
    #[error(transparent)]
    Connectivity(#[from] ConnectivityConfigError),
}

/// Complete dispatcher configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Identity of this dispatcher.
    pub dispatcher: DispatcherSection,
    /// Heartbeat and health thresholds.
    pub connectivity: ConnectivityConfig,
    /// Remote-call defaults.
    pub rpc: RpcSection,
}

impl RuntimeConfig {
    /// Load from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RuntimeConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    /// Parse from a TOML string.
    pub fn from_toml(raw: &str) -> Result<Self, RuntimeConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Enforce cross-field constraints.
    pub fn validate(&self) -> Result<(), RuntimeConfigError> {
        self.connectivity.validate()?;
        Ok(())
    }

    /// The configured dispatcher id, or a generated one.
    #[must_use]
    pub fn dispatcher_id(&self) -> DispatcherId {
        self.dispatcher
            .id
            .as_deref()
            .map_or_else(DispatcherId::generate, DispatcherId::new)
    }

    /// The status-record identity announced to peers.
    #[must_use]
    pub fn identity(&self) -> LocalIdentity {
        LocalIdentity {
            env: self.dispatcher.env.clone(),
            version: self
                .dispatcher
                .version
                .clone()
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            tags: self.dispatcher.tags.clone(),
        }
    }
}

/// Identity of the local dispatcher.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherSection {
    /// Stable dispatcher id; generated per process when absent.
    pub id: Option<String>,
    /// Deployment environment label.
    pub env: String,
    /// Version label; the crate version when absent.
    pub version: Option<String>,
    /// Free-form tags shared in the status record.
    pub tags: Vec<String>,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            id: None,
            env: "dev".to_string(),
            version: None,
            tags: Vec::new(),
        }
    }
}

/// Remote-call defaults.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RpcSection {
    /// Default call timeout in milliseconds; `0` disables the timer.
    pub default_timeout_ms: u64,
}

impl Default for RpcSection {
    fn default() -> Self {
        Self {
            default_timeout_ms: 5_000,
        }
    }
}
