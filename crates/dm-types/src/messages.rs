//! # Wire Message Catalogue
//!
//! The logical shape of everything that crosses the transport bridge.
//! Every message is a broadcast: targeting is expressed *inside* the
//! message (`RpcRequest::target`), and non-targets ignore it silently.

use crate::ids::{DispatcherId, TaskId};
use crate::instances::InstanceDescription;
use crate::services::ServiceDescriptor;
use crate::status::PeerStatus;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One positional call parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallParam {
    /// Position in the parameter list.
    pub idx: usize,
    /// Parameter value.
    pub data: Value,
}

/// A pub/sub data change crossing the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotice {
    /// `/`-delimited topic path the value was published on.
    pub path: String,
    /// The published (possibly projected) value.
    pub data: Value,
    /// Sender id used for rebroadcast suppression.
    pub sender: String,
    /// Publisher-clock timestamp, milliseconds since epoch.
    pub timestamp: u64,
    /// Deliver even when the value is unchanged.
    pub forced: bool,
}

/// A pub/sub event: a change notice plus positional event arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNotice {
    /// The underlying change.
    #[serde(flatten)]
    pub change: ChangeNotice,
    /// Event arguments.
    #[serde(default)]
    pub args: Vec<Value>,
}

/// A remote call request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Caller-generated task id.
    pub task_id: TaskId,
    /// Service id to invoke.
    pub function_id: String,
    /// Positional parameters.
    pub params: Vec<CallParam>,
    /// Optional named sink the result should be labelled with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_sink: Option<String>,
    /// The calling dispatcher.
    pub requested_by: DispatcherId,
    /// The dispatcher expected to execute; everyone else ignores the
    /// request silently.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<DispatcherId>,
}

impl RpcRequest {
    /// Parameter values in positional order.
    #[must_use]
    pub fn param_values(&self) -> Vec<Value> {
        let mut params = self.params.clone();
        params.sort_by_key(|p| p.idx);
        params.into_iter().map(|p| p.data).collect()
    }
}

/// A remote call response. Exactly one of `result`/`error` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    /// The task this resolves.
    pub task_id: TaskId,
    /// Mirrors `RpcRequest::result_sink`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sink: Option<String>,
    /// Success value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcResponse {
    /// A success response.
    #[must_use]
    pub fn ok(task_id: TaskId, sink: Option<String>, result: Value) -> Self {
        Self {
            task_id,
            sink,
            result: Some(result),
            error: None,
        }
    }

    /// An error response.
    pub fn err(task_id: TaskId, sink: Option<String>, error: impl Into<String>) -> Self {
        Self {
            task_id,
            sink,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Every message the core exchanges over a transport bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WireMessage {
    /// Discovery broadcast, sent once on startup and answered by every
    /// peer with its own status.
    Bonjour {
        /// The newly arrived dispatcher.
        dispatcher_id: DispatcherId,
    },
    /// Heartbeat carrying the full status record.
    StatusChanged(PeerStatus),
    /// Full replacement of one dispatcher's service list (never a diff).
    ServicesChanged {
        /// The reporting dispatcher.
        dispatcher: DispatcherId,
        /// Its complete current service list.
        services: Vec<ServiceDescriptor>,
    },
    /// Full replacement of one dispatcher's hosted instance list.
    InstancesChanged {
        /// The reporting dispatcher.
        dispatcher: DispatcherId,
        /// Its complete current instance list.
        instances: Vec<InstanceDescription>,
    },
    /// Pub/sub data fan-out.
    DataChanged(ChangeNotice),
    /// Pub/sub event fan-out.
    Event(EventNotice),
    /// Remote call request.
    RpcRequest(RpcRequest),
    /// Remote call response.
    RpcResponse(RpcResponse),
    /// Cooperative cancellation of an in-flight task.
    TaskCancelation {
        /// Dispatcher requesting the cancellation.
        dispatcher: DispatcherId,
        /// The task to cancel.
        task_id: TaskId,
        /// Human-readable reason.
        reason: String,
        /// Suppress warning-level logging on the executing side.
        #[serde(default)]
        quiet: bool,
    },
    /// A single service disappeared from one dispatcher.
    RpcUnregister {
        /// The removed service id.
        identifier: String,
        /// The dispatcher that owned it.
        dispatcher_id: DispatcherId,
    },
}
