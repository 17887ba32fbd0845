//! # Identifiers
//!
//! Newtype identifiers shared across all subsystems.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of one running dispatcher process.
///
/// Ordered lexicographically; the ordering is load-bearing: the merge table
/// tie-break and the master election tie-break both pick the lowest id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DispatcherId(String);

impl DispatcherId {
    /// Create an id from an explicit string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DispatcherId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DispatcherId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Identifier of one in-flight remote call.
///
/// Globally unique per call, generated locally by the calling side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generate a fresh task id.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
