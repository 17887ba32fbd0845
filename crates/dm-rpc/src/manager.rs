//! # The Manager
//!
//! Owns the local service registry, the merged network-wide service view,
//! the pending-task table (calls this dispatcher issued), and the
//! executing-task table (calls this dispatcher is running for others).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dm_connectivity::{ConnectivityManager, PeerChange};
use dm_merge::MergeTable;
use dm_types::{
    CallOptions, CallParam, DispatchError, DispatcherId, RpcRequest, RpcResponse,
    ServiceDescriptor, TaskId, WireMessage,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::handler::{CallContext, ServiceHandler};
use crate::selector::resolve_target;

struct LocalService {
    descriptor: ServiceDescriptor,
    handler: Arc<dyn ServiceHandler>,
}

struct PendingTask {
    service: String,
    target: DispatcherId,
    resolver: oneshot::Sender<Result<Value, DispatchError>>,
    timeout: Option<tokio::task::JoinHandle<()>>,
}

struct ExecutingTask {
    requested_by: DispatcherId,
    cancel: watch::Sender<bool>,
    join: tokio::task::JoinHandle<()>,
}

struct RpcState {
    local: HashMap<String, LocalService>,
    services: MergeTable<ServiceDescriptor>,
    pending: HashMap<TaskId, PendingTask>,
    executing: HashMap<TaskId, ExecutingTask>,
    disposed: bool,
}

/// Handle returned by [`RpcManager::register_service`].
pub struct ServiceHandle {
    id: String,
    manager: Arc<RpcManager>,
}

impl std::fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl ServiceHandle {
    /// The registered service id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remove the service and broadcast the shrunken list.
    pub fn unregister(self) {
        self.manager.unregister_service(&self.id);
    }
}

/// Service registry and remote-call execution engine.
pub struct RpcManager {
    local_id: DispatcherId,
    connectivity: Arc<ConnectivityManager>,
    outbound: mpsc::UnboundedSender<WireMessage>,
    inner: Mutex<RpcState>,
}

impl RpcManager {
    /// Create the manager.
    pub fn new(
        connectivity: Arc<ConnectivityManager>,
        outbound: mpsc::UnboundedSender<WireMessage>,
    ) -> Arc<Self> {
        Arc::new(Self {
            local_id: connectivity.local_id().clone(),
            connectivity,
            outbound,
            inner: Mutex::new(RpcState {
                local: HashMap::new(),
                services: MergeTable::new(),
                pending: HashMap::new(),
                executing: HashMap::new(),
                disposed: false,
            }),
        })
    }

    /// The owning dispatcher id.
    #[must_use]
    pub fn local_id(&self) -> &DispatcherId {
        &self.local_id
    }

    /// Register a callable service.
    ///
    /// Re-registering the *same* handler under the same id is a no-op
    /// success; a different handler under an existing id is a
    /// `DuplicateRegistration` error. Registration broadcasts the full
    /// local service list.
    pub fn register_service(
        self: &Arc<Self>,
        descriptor: ServiceDescriptor,
        handler: Arc<dyn ServiceHandler>,
    ) -> Result<ServiceHandle, DispatchError> {
        let id = descriptor.id.clone();
        {
            let mut state = self.lock();
            if let Some(existing) = state.local.get(&id) {
                if Arc::ptr_eq(&existing.handler, &handler) {
                    return Ok(ServiceHandle {
                        id,
                        manager: Arc::clone(self),
                    });
                }
                return Err(DispatchError::DuplicateRegistration(id));
            }
            state.local.insert(
                id.clone(),
                LocalService {
                    descriptor,
                    handler,
                },
            );
            Self::rebuild_local_source(&self.local_id, &mut state);
        }
        info!(service = %id, "Service registered");
        self.broadcast_services();
        Ok(ServiceHandle {
            id,
            manager: Arc::clone(self),
        })
    }

    /// Remove a local service and tell the network.
    pub fn unregister_service(&self, id: &str) {
        let removed = {
            let mut state = self.lock();
            let removed = state.local.remove(id).is_some();
            if removed {
                Self::rebuild_local_source(&self.local_id, &mut state);
            }
            removed
        };
        if !removed {
            return;
        }
        info!(service = %id, "Service unregistered");
        self.broadcast_services();
        self.send(WireMessage::RpcUnregister {
            identifier: id.to_string(),
            dispatcher_id: self.local_id.clone(),
        });
    }

    /// Whether any dispatcher (self included) currently provides `id`.
    #[must_use]
    pub fn service_exists(&self, id: &str) -> bool {
        self.lock().services.amount_of(id) > 0
    }

    /// Dispatchers providing `id`, in id order.
    #[must_use]
    pub fn providers(&self, id: &str) -> Vec<DispatcherId> {
        self.lock().services.sources_of(id)
    }

    /// Descriptors of locally registered services.
    #[must_use]
    pub fn local_services(&self) -> Vec<ServiceDescriptor> {
        let state = self.lock();
        let mut list: Vec<ServiceDescriptor> =
            state.local.values().map(|s| s.descriptor.clone()).collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    /// Task ids of calls this dispatcher is still waiting on.
    #[must_use]
    pub fn pending_tasks(&self) -> Vec<TaskId> {
        self.lock().pending.keys().copied().collect()
    }

    /// Ids of every service known anywhere in the mesh.
    #[must_use]
    pub fn known_services(&self) -> Vec<String> {
        let state = self.lock();
        let mut ids: Vec<String> = state.services.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Issue a remote call and wait for its resolution.
    pub async fn perform_call(
        self: &Arc<Self>,
        service: &str,
        params: Vec<Value>,
        options: CallOptions,
    ) -> Result<Value, DispatchError> {
        let target = {
            let state = self.lock();
            let providers = state.services.sources_of(service);
            if providers.is_empty() {
                // Fail fast, before anything touches the network.
                return Err(DispatchError::ServiceNotFound(service.to_string()));
            }
            resolve_target(
                service,
                &providers,
                options.selector,
                options.target.as_ref(),
                &self.connectivity,
            )?
        };

        let task_id = TaskId::generate();
        let (resolver, resolution) = oneshot::channel();

        let timeout = (options.timeout_ms > 0).then(|| {
            let manager = Arc::clone(self);
            let ms = options.timeout_ms;
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(ms)).await;
                manager.fail_task(task_id, DispatchError::Timeout(ms));
            })
        });

        {
            let mut state = self.lock();
            state.pending.insert(
                task_id,
                PendingTask {
                    service: service.to_string(),
                    target: target.clone(),
                    resolver,
                    timeout,
                },
            );
        }

        let request = RpcRequest {
            task_id,
            function_id: service.to_string(),
            params: params
                .into_iter()
                .enumerate()
                .map(|(idx, data)| CallParam { idx, data })
                .collect(),
            result_sink: None,
            requested_by: self.local_id.clone(),
            target: Some(target.clone()),
        };

        debug!(service, task = %task_id, target = %target, "Issuing call");
        if target == self.local_id {
            // The transport does not echo our own broadcasts back; run
            // self-targeted calls directly.
            self.execute_request(request);
        } else {
            self.send(WireMessage::RpcRequest(request));
        }

        resolution
            .await
            .unwrap_or_else(|_| Err(DispatchError::Cancelled("dispatcher disposed".to_string())))
    }

    /// Reject a pending task locally and broadcast the cancellation so
    /// the executing peer can interrupt in-flight work.
    pub fn cancel_task(&self, task_id: TaskId, reason: impl Into<String>) {
        let reason = reason.into();
        self.fail_task(task_id, DispatchError::Cancelled(reason.clone()));
        self.send(WireMessage::TaskCancelation {
            dispatcher: self.local_id.clone(),
            task_id,
            reason,
            quiet: false,
        });
    }

    /// Route an inbound rpc-related message. Others are ignored.
    pub fn handle_message(self: &Arc<Self>, message: WireMessage) {
        match message {
            WireMessage::RpcRequest(request) => self.execute_request(request),
            WireMessage::RpcResponse(response) => self.handle_response(response),
            WireMessage::ServicesChanged {
                dispatcher,
                services,
            } if dispatcher != self.local_id => {
                let map: HashMap<String, ServiceDescriptor> = services
                    .into_iter()
                    .map(|descriptor| (descriptor.id.clone(), descriptor))
                    .collect();
                self.lock().services.set_source(dispatcher, map);
            }
            WireMessage::RpcUnregister {
                identifier,
                dispatcher_id,
            } if dispatcher_id != self.local_id => {
                self.lock().services.remove_key(&dispatcher_id, &identifier);
            }
            WireMessage::TaskCancelation {
                dispatcher,
                task_id,
                reason,
                quiet,
            } => self.handle_cancelation(&dispatcher, task_id, &reason, quiet),
            _ => {}
        }
    }

    /// Purge state tied to departed peers.
    ///
    /// Pending calls targeting a removed peer reject with `PeerRemoved`;
    /// work a removed peer asked this process to run is aborted, since its
    /// result could never be delivered.
    pub fn on_peers_changed(&self, change: &PeerChange) {
        for peer in &change.removed {
            let (orphaned, abandoned) = {
                let mut state = self.lock();
                state.services.remove_source(peer);
                let orphaned: Vec<TaskId> = state
                    .pending
                    .iter()
                    .filter(|(_, task)| task.target == *peer)
                    .map(|(id, _)| *id)
                    .collect();
                let abandoned: Vec<TaskId> = state
                    .executing
                    .iter()
                    .filter(|(_, task)| task.requested_by == *peer)
                    .map(|(id, _)| *id)
                    .collect();
                (orphaned, abandoned)
            };

            for task_id in orphaned {
                self.fail_task(task_id, DispatchError::PeerRemoved(peer.clone()));
            }
            for task_id in abandoned {
                let Some(task) = self.lock().executing.remove(&task_id) else {
                    continue;
                };
                warn!(task = %task_id, peer = %peer, "Aborting work for removed requester");
                let _ = task.cancel.send(true);
                task.join.abort();
            }
        }
    }

    /// Tear down timers and tables. Idempotent.
    pub fn dispose(&self) {
        let (pending, executing) = {
            let mut state = self.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.local.clear();
            state.services.dispose();
            let pending: Vec<PendingTask> =
                state.pending.drain().map(|(_, task)| task).collect();
            let executing: Vec<ExecutingTask> =
                state.executing.drain().map(|(_, task)| task).collect();
            (pending, executing)
        };
        for task in pending {
            if let Some(timer) = task.timeout {
                timer.abort();
            }
            let _ = task
                .resolver
                .send(Err(DispatchError::Cancelled("dispatcher disposed".to_string())));
        }
        for task in executing {
            let _ = task.cancel.send(true);
            task.join.abort();
        }
    }

    /// Resolve or reject a pending task. Unmatched ids are logged and
    /// dropped; the caller already gave up.
    fn handle_response(&self, response: RpcResponse) {
        let Some(task) = self.lock().pending.remove(&response.task_id) else {
            debug!(task = %response.task_id, "Response for unknown task dropped");
            return;
        };
        if let Some(timer) = task.timeout {
            timer.abort();
        }
        let outcome = match (response.result, response.error) {
            (Some(value), None) => Ok(value),
            (None, Some(error)) => Err(DispatchError::Handler(error)),
            (result, _) => {
                warn!(task = %response.task_id, service = %task.service,
                      "Malformed response (result/error invariant violated)");
                result.ok_or_else(|| {
                    DispatchError::Handler("malformed response".to_string())
                })
            }
        };
        let _ = task.resolver.send(outcome);
    }

    fn fail_task(&self, task_id: TaskId, error: DispatchError) {
        let Some(task) = self.lock().pending.remove(&task_id) else {
            return;
        };
        if let Some(timer) = task.timeout {
            timer.abort();
        }
        debug!(task = %task_id, service = %task.service, error = %error, "Task rejected");
        let _ = task.resolver.send(Err(error));
    }

    /// Run a request targeted at this dispatcher. Requests for other
    /// targets are ignored silently: the same broadcast reaches every
    /// peer and only the intended one acts.
    fn execute_request(self: &Arc<Self>, request: RpcRequest) {
        if request.target.as_ref() != Some(&self.local_id) {
            return;
        }

        let handler = {
            let state = self.lock();
            if state.disposed {
                return;
            }
            state.local.get(&request.function_id).map(|s| Arc::clone(&s.handler))
        };
        let Some(handler) = handler else {
            // Targeted at us but not registered here (stale view on the
            // caller's side); answer instead of leaving the caller to
            // time out.
            self.send(WireMessage::RpcResponse(RpcResponse::err(
                request.task_id,
                request.result_sink,
                DispatchError::ServiceNotFound(request.function_id).to_wire(),
            )));
            return;
        };

        let task_id = request.task_id;
        let requested_by = request.requested_by.clone();
        let params = request.param_values();
        let sink = request.result_sink.clone();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let ctx = CallContext::new(task_id, requested_by.clone(), cancel_rx);

        // The task waits for its table entry to exist before running, so
        // cancellation can never race past registration.
        let (registered_tx, registered_rx) = oneshot::channel::<()>();
        let manager = Arc::clone(self);
        let join = tokio::spawn(async move {
            let _ = registered_rx.await;
            let result = handler.call(params, ctx).await;
            manager.lock().executing.remove(&task_id);
            let response = match result {
                Ok(value) => RpcResponse::ok(task_id, sink, value),
                Err(error) => RpcResponse::err(task_id, sink, error),
            };
            manager.deliver_response(response);
        });

        self.lock().executing.insert(
            task_id,
            ExecutingTask {
                requested_by,
                cancel: cancel_tx,
                join,
            },
        );
        let _ = registered_tx.send(());
    }

    fn handle_cancelation(&self, dispatcher: &DispatcherId, task_id: TaskId, reason: &str, quiet: bool) {
        let Some(task) = self.lock().executing.get(&task_id).map(|t| t.cancel.clone()) else {
            return;
        };
        if !quiet {
            warn!(task = %task_id, from = %dispatcher, reason, "Task cancellation requested");
        }
        let _ = task.send(true);
    }

    /// Responses to our own self-targeted calls resolve directly; all
    /// others cross the wire.
    fn deliver_response(self: &Arc<Self>, response: RpcResponse) {
        if self.lock().pending.contains_key(&response.task_id) {
            self.handle_response(response);
        } else {
            self.send(WireMessage::RpcResponse(response));
        }
    }

    fn broadcast_services(&self) {
        let services = self.local_services();
        self.send(WireMessage::ServicesChanged {
            dispatcher: self.local_id.clone(),
            services,
        });
    }

    fn rebuild_local_source(local_id: &DispatcherId, state: &mut RpcState) {
        let map: HashMap<String, ServiceDescriptor> = state
            .local
            .iter()
            .map(|(id, service)| (id.clone(), service.descriptor.clone()))
            .collect();
        state.services.set_source(local_id.clone(), map);
    }

    fn send(&self, message: WireMessage) {
        if self.outbound.send(message).is_err() {
            debug!("Outbound channel closed, dropping rpc message");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RpcState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::service_fn;
    use dm_connectivity::{ConnectivityConfig, LocalIdentity};
    use serde_json::json;

    fn setup(id: &str) -> (Arc<RpcManager>, mpsc::UnboundedReceiver<WireMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connectivity = Arc::new(ConnectivityManager::new(
            DispatcherId::new(id),
            LocalIdentity::default(),
            ConnectivityConfig::default(),
            tx.clone(),
        ));
        (RpcManager::new(connectivity, tx), rx)
    }

    fn echo_handler() -> Arc<dyn ServiceHandler> {
        service_fn(|params, _ctx| async move { Ok(json!(params)) })
    }

    #[tokio::test]
    async fn test_register_reflects_in_service_exists() {
        let (manager, _rx) = setup("local");
        assert!(!manager.service_exists("echo"));

        let handle = manager
            .register_service(ServiceDescriptor::named("echo"), echo_handler())
            .unwrap();
        assert!(manager.service_exists("echo"));

        handle.unregister();
        assert!(!manager.service_exists("echo"));
    }

    #[tokio::test]
    async fn test_duplicate_registration_semantics() {
        let (manager, _rx) = setup("local");
        let handler = echo_handler();

        manager
            .register_service(ServiceDescriptor::named("echo"), Arc::clone(&handler))
            .unwrap();

        // Same handler again: no-op success.
        assert!(manager
            .register_service(ServiceDescriptor::named("echo"), Arc::clone(&handler))
            .is_ok());

        // Different handler under the same id: error.
        let err = manager
            .register_service(ServiceDescriptor::named("echo"), echo_handler())
            .unwrap_err();
        assert_eq!(err, DispatchError::DuplicateRegistration("echo".into()));
    }

    #[tokio::test]
    async fn test_registration_broadcasts_full_list() {
        let (manager, mut rx) = setup("local");
        // Drain the construction-time bonjour.
        while let Ok(msg) = rx.try_recv() {
            assert!(matches!(msg, WireMessage::Bonjour { .. }));
        }

        manager
            .register_service(ServiceDescriptor::named("a"), echo_handler())
            .unwrap();
        manager
            .register_service(ServiceDescriptor::named("b"), echo_handler())
            .unwrap();

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        match (first, second) {
            (
                WireMessage::ServicesChanged { services: one, .. },
                WireMessage::ServicesChanged { services: two, .. },
            ) => {
                assert_eq!(one.len(), 1);
                // Always the full list, never a diff.
                assert_eq!(two.len(), 2);
            }
            other => panic!("expected two ServicesChanged, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_call_unknown_service_sends_nothing() {
        let (manager, mut rx) = setup("local");
        while rx.try_recv().is_ok() {}

        let err = manager
            .perform_call("missing", vec![], CallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::ServiceNotFound("missing".into()));
        assert!(rx.try_recv().is_err(), "no network message may be sent");
    }

    #[tokio::test]
    async fn test_local_call_round_trip() {
        let (manager, _rx) = setup("local");
        manager
            .register_service(
                ServiceDescriptor::named("echo"),
                service_fn(|params, _ctx| async move { Ok(params[0].clone()) }),
            )
            .unwrap();

        let result = manager
            .perform_call("echo", vec![json!("hello")], CallOptions::default())
            .await
            .unwrap();
        assert_eq!(result, json!("hello"));
    }

    #[tokio::test]
    async fn test_handler_error_propagates() {
        let (manager, _rx) = setup("local");
        manager
            .register_service(
                ServiceDescriptor::named("broken"),
                service_fn(|_params, _ctx| async move { Err("kaput".to_string()) }),
            )
            .unwrap();

        let err = manager
            .perform_call("broken", vec![], CallOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::Handler("kaput".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_rejects_and_clears_pending() {
        let (manager, _rx) = setup("local");
        // A remote-looking provider that will never answer.
        manager.handle_message(WireMessage::ServicesChanged {
            dispatcher: DispatcherId::new("remote"),
            services: vec![ServiceDescriptor::named("slow")],
        });

        let err = manager
            .perform_call("slow", vec![], CallOptions::with_timeout(250))
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::Timeout(250));
        assert!(manager.lock().pending.is_empty());
    }

    #[tokio::test]
    async fn test_response_resolves_pending() {
        let (manager, _rx) = setup("local");
        manager.handle_message(WireMessage::ServicesChanged {
            dispatcher: DispatcherId::new("remote"),
            services: vec![ServiceDescriptor::named("svc")],
        });

        let call = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .perform_call("svc", vec![], CallOptions::default())
                    .await
            })
        };
        // Wait for the pending entry to exist.
        tokio::task::yield_now().await;
        let task_id = *manager.lock().pending.keys().next().unwrap();

        manager.handle_message(WireMessage::RpcResponse(RpcResponse::ok(
            task_id,
            None,
            json!(42),
        )));
        assert_eq!(call.await.unwrap().unwrap(), json!(42));
    }

    #[tokio::test]
    async fn test_unmatched_response_dropped() {
        let (manager, _rx) = setup("local");
        // Must not panic or create state.
        manager.handle_message(WireMessage::RpcResponse(RpcResponse::ok(
            TaskId::generate(),
            None,
            json!(1),
        )));
        assert!(manager.lock().pending.is_empty());
    }

    #[tokio::test]
    async fn test_request_for_other_target_ignored() {
        let (manager, mut rx) = setup("local");
        while rx.try_recv().is_ok() {}

        manager.handle_message(WireMessage::RpcRequest(RpcRequest {
            task_id: TaskId::generate(),
            function_id: "anything".into(),
            params: vec![],
            result_sink: None,
            requested_by: DispatcherId::new("remote"),
            target: Some(DispatcherId::new("someone-else")),
        }));
        tokio::task::yield_now().await;
        assert!(rx.try_recv().is_err(), "foreign-target request must be silent");
    }

    #[tokio::test]
    async fn test_peer_removal_rejects_pending() {
        let (manager, _rx) = setup("local");
        let remote = DispatcherId::new("remote");
        manager.handle_message(WireMessage::ServicesChanged {
            dispatcher: remote.clone(),
            services: vec![ServiceDescriptor::named("svc")],
        });

        let call = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .perform_call("svc", vec![], CallOptions::default())
                    .await
            })
        };
        tokio::task::yield_now().await;

        manager.on_peers_changed(&PeerChange {
            added: vec![],
            removed: vec![remote.clone()],
        });
        assert_eq!(
            call.await.unwrap().unwrap_err(),
            DispatchError::PeerRemoved(remote.clone())
        );
        // The departed peer's services are gone from the view too.
        assert!(!manager.service_exists("svc"));
    }

    #[tokio::test]
    async fn test_cancel_task_rejects_and_broadcasts() {
        let (manager, mut rx) = setup("local");
        manager.handle_message(WireMessage::ServicesChanged {
            dispatcher: DispatcherId::new("remote"),
            services: vec![ServiceDescriptor::named("svc")],
        });
        while rx.try_recv().is_ok() {}

        let call = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .perform_call("svc", vec![], CallOptions::default())
                    .await
            })
        };
        tokio::task::yield_now().await;
        let task_id = *manager.lock().pending.keys().next().unwrap();

        manager.cancel_task(task_id, "operator abort");
        assert_eq!(
            call.await.unwrap().unwrap_err(),
            DispatchError::Cancelled("operator abort".into())
        );

        // An RpcRequest then a TaskCancelation crossed the wire.
        let mut saw_cancelation = false;
        while let Ok(msg) = rx.try_recv() {
            if let WireMessage::TaskCancelation { task_id: cancelled, .. } = msg {
                assert_eq!(cancelled, task_id);
                saw_cancelation = true;
            }
        }
        assert!(saw_cancelation);
    }

    #[tokio::test]
    async fn test_cooperative_cancellation_reaches_handler() {
        let (manager, _rx) = setup("local");
        let (seen_tx, seen_rx) = oneshot::channel::<()>();
        let seen_tx = std::sync::Mutex::new(Some(seen_tx));
        manager
            .register_service(
                ServiceDescriptor::named("patient"),
                service_fn(move |_params, mut ctx| {
                    let seen = seen_tx.lock().unwrap().take();
                    async move {
                        ctx.cancelled().await;
                        if let Some(tx) = seen {
                            let _ = tx.send(());
                        }
                        Err("Cancelled: caller asked".to_string())
                    }
                }),
            )
            .unwrap();

        // Execute as if a remote peer targeted us.
        let task_id = TaskId::generate();
        manager.handle_message(WireMessage::RpcRequest(RpcRequest {
            task_id,
            function_id: "patient".into(),
            params: vec![],
            result_sink: None,
            requested_by: DispatcherId::new("remote"),
            target: Some(DispatcherId::new("local")),
        }));
        tokio::task::yield_now().await;

        manager.handle_message(WireMessage::TaskCancelation {
            dispatcher: DispatcherId::new("remote"),
            task_id,
            reason: "caller asked".into(),
            quiet: true,
        });
        seen_rx.await.expect("handler observed cancellation");
    }

    #[tokio::test]
    async fn test_dispose_idempotent_and_rejects_pending() {
        let (manager, _rx) = setup("local");
        manager.handle_message(WireMessage::ServicesChanged {
            dispatcher: DispatcherId::new("remote"),
            services: vec![ServiceDescriptor::named("svc")],
        });
        let call = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                manager
                    .perform_call("svc", vec![], CallOptions::default())
                    .await
            })
        };
        tokio::task::yield_now().await;

        manager.dispose();
        manager.dispose();
        assert_eq!(
            call.await.unwrap().unwrap_err(),
            DispatchError::Cancelled("dispatcher disposed".into())
        );
    }
}
