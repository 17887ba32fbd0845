//! # Service Handlers
//!
//! The callee side of a service: an async function from positional JSON
//! parameters to a result, with a context exposing the task identity and
//! the cooperative cancellation flag.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use dm_types::{DispatcherId, TaskId};
use serde_json::Value;
use tokio::sync::watch;

/// Per-invocation context handed to a service handler.
#[derive(Debug, Clone)]
pub struct CallContext {
    /// The task this invocation answers.
    pub task_id: TaskId,
    /// The calling dispatcher.
    pub requested_by: DispatcherId,
    cancelled: watch::Receiver<bool>,
}

impl CallContext {
    pub(crate) fn new(
        task_id: TaskId,
        requested_by: DispatcherId,
        cancelled: watch::Receiver<bool>,
    ) -> Self {
        Self {
            task_id,
            requested_by,
            cancelled,
        }
    }

    /// Whether the caller has asked for this task to stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Wait until the task is cancelled. Long-running handlers select on
    /// this next to their own work.
    pub async fn cancelled(&mut self) {
        // An error means the manager dropped the sender, which only
        // happens on disposal; treat it like a cancellation.
        let _ = self.cancelled.wait_for(|cancelled| *cancelled).await;
    }
}

/// A registered callable service.
#[async_trait]
pub trait ServiceHandler: Send + Sync {
    /// Execute one call. Errors travel back to the caller verbatim in the
    /// response's error field.
    async fn call(&self, params: Vec<Value>, ctx: CallContext) -> Result<Value, String>;
}

struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ServiceHandler for FnHandler<F>
where
    F: Fn(Vec<Value>, CallContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, String>> + Send,
{
    async fn call(&self, params: Vec<Value>, ctx: CallContext) -> Result<Value, String> {
        (self.f)(params, ctx).await
    }
}

/// Wrap an async closure as a [`ServiceHandler`].
pub fn service_fn<F, Fut>(f: F) -> Arc<dyn ServiceHandler>
where
    F: Fn(Vec<Value>, CallContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, String>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}
