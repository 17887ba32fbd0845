//! # Hosting Side
//!
//! Traits implemented by the process that owns an instance. The host
//! handle never leaves the owning dispatcher; everything remote goes
//! through the `call:<identifier>` service.

use async_trait::async_trait;
use dm_types::InstanceDescription;
use serde_json::Value;
use std::sync::Arc;

/// A locally hosted distributed instance.
#[async_trait]
pub trait InstanceHost: Send + Sync {
    /// Dispatch one method call. Errors travel back to the remote caller
    /// verbatim.
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, String>;

    /// The network-visible shape (methods, properties, events).
    fn describe(&self) -> InstanceDescription;

    /// Release resources. Called exactly once, when the last user lets go.
    async fn dispose(&self);
}

/// Builds hosts for one constructor type.
#[async_trait]
pub trait InstanceFactory: Send + Sync {
    /// Construct the instance behind `identifier` with `params`.
    async fn construct(
        &self,
        identifier: &str,
        params: Value,
    ) -> Result<Arc<dyn InstanceHost>, String>;
}
