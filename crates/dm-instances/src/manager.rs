//! # The Manager
//!
//! Owns the local instance records (host handle, user list, service
//! handles), the merged network-wide instance view, and the
//! under-construction table that de-duplicates concurrent creation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use dm_connectivity::PeerChange;
use dm_merge::MergeTable;
use dm_pubsub::{DataEngine, PubSubEngine};
use dm_rpc::{service_fn, RpcManager, ServiceHandle};
use dm_types::{
    CallOptions, DispatchError, DispatcherId, InstanceDescription, ServiceDescriptor, WireMessage,
};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::host::{InstanceFactory, InstanceHost};
use crate::wrapper::{GenericWrapper, InstanceClient, WrapperGenerator, WrapperParts};

struct InstanceRecord {
    description: InstanceDescription,
    host: Arc<dyn InstanceHost>,
    used_by: Vec<DispatcherId>,
    manual: bool,
    creation_hash: [u8; 32],
    services: Vec<ServiceHandle>,
}

#[derive(Clone)]
enum BuildPhase {
    Building,
    Ready,
    Failed(String),
}

struct UnderConstruction {
    hash: [u8; 32],
    phase: watch::Receiver<BuildPhase>,
}

struct InstState {
    records: HashMap<String, InstanceRecord>,
    view: MergeTable<InstanceDescription>,
    building: HashMap<String, UnderConstruction>,
    generators: HashMap<String, Arc<dyn WrapperGenerator>>,
    constructors: Vec<ServiceHandle>,
    disposed: bool,
}

/// Distributed instance registry and factory frontend.
pub struct InstanceManager {
    local_id: DispatcherId,
    rpc: Arc<RpcManager>,
    data: Arc<DataEngine>,
    events: Arc<PubSubEngine>,
    outbound: mpsc::UnboundedSender<WireMessage>,
    inner: Mutex<InstState>,
}

fn creation_hash(description: &InstanceDescription) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(description.identifier.as_bytes());
    hasher.update(b"|");
    hasher.update(description.type_name.as_bytes());
    hasher.update(b"|");
    hasher.update(description.params.to_string().as_bytes());
    hasher.finalize().into()
}

impl InstanceManager {
    /// Create the manager. The `"*"` wrapper generator is preinstalled.
    pub fn new(
        rpc: Arc<RpcManager>,
        data: Arc<DataEngine>,
        events: Arc<PubSubEngine>,
        outbound: mpsc::UnboundedSender<WireMessage>,
    ) -> Arc<Self> {
        let mut generators: HashMap<String, Arc<dyn WrapperGenerator>> = HashMap::new();
        generators.insert("*".to_string(), Arc::new(GenericWrapper));
        Arc::new(Self {
            local_id: rpc.local_id().clone(),
            rpc,
            data,
            events,
            outbound,
            inner: Mutex::new(InstState {
                records: HashMap::new(),
                view: MergeTable::new(),
                building: HashMap::new(),
                generators,
                constructors: Vec::new(),
                disposed: false,
            }),
        })
    }

    /// Register a constructor for `type_name`, exposed to the whole mesh
    /// as the `construct:<type>` service.
    pub fn register_constructor(
        self: &Arc<Self>,
        type_name: impl Into<String>,
        factory: Arc<dyn InstanceFactory>,
    ) -> Result<(), DispatchError> {
        let type_name = type_name.into();
        let manager = Arc::downgrade(self);
        let handler = service_fn(move |params, ctx| {
            let manager = Weak::clone(&manager);
            let factory = Arc::clone(&factory);
            async move {
                let Some(manager) = manager.upgrade() else {
                    return Err("dispatcher disposed".to_string());
                };
                let description: InstanceDescription =
                    serde_json::from_value(params.first().cloned().unwrap_or(Value::Null))
                        .map_err(|e| format!("malformed instance description: {e}"))?;
                let built = manager
                    .construct_local(&factory, description, ctx.requested_by)
                    .await
                    .map_err(|e| e.to_wire())?;
                serde_json::to_value(built).map_err(|e| e.to_string())
            }
        });

        let handle = self.rpc.register_service(
            ServiceDescriptor::named(format!("construct:{type_name}")),
            handler,
        )?;
        self.lock().constructors.push(handle);
        info!(type_name = %type_name, "Constructor registered");
        Ok(())
    }

    /// Install a wrapper generator for one constructor type.
    pub fn register_wrapper_generator(
        &self,
        type_name: impl Into<String>,
        generator: Arc<dyn WrapperGenerator>,
    ) {
        self.lock().generators.insert(type_name.into(), generator);
    }

    /// Expose an already-built local object as a distributed instance.
    ///
    /// Manual instances are never reference-counted away; they live until
    /// [`InstanceManager::unregister_instance`] or disposal.
    pub fn register_instance(
        self: &Arc<Self>,
        host: Arc<dyn InstanceHost>,
    ) -> Result<(), DispatchError> {
        let description = host.describe();
        let identifier = description.identifier.clone();
        if self.lock().records.contains_key(&identifier) {
            return Err(DispatchError::DuplicateRegistration(identifier));
        }
        let hash = creation_hash(&description);
        let services = self.register_instance_services(&identifier)?;
        self.insert_record(InstanceRecord {
            description,
            host,
            used_by: Vec::new(),
            manual: true,
            creation_hash: hash,
            services,
        });
        self.broadcast_instances();
        Ok(())
    }

    /// Remove a manually registered instance and dispose its host.
    pub async fn unregister_instance(&self, identifier: &str) -> Result<(), DispatchError> {
        let record = {
            let mut state = self.lock();
            let Some(record) = state.records.remove(identifier) else {
                return Err(DispatchError::ServiceNotFound(identifier.to_string()));
            };
            Self::rebuild_local_source(&self.local_id, &mut state);
            record
        };
        self.teardown_record(record).await;
        self.broadcast_instances();
        Ok(())
    }

    /// Create (or join) the instance described by `description` and wrap
    /// it for local use.
    ///
    /// Fails with `ConstructorNotFound` when no dispatcher anywhere offers
    /// `construct:<type>`; the construction itself is de-duplicated on the
    /// hosting side by parameter hash.
    pub async fn create_instance(
        self: &Arc<Self>,
        description: InstanceDescription,
    ) -> Result<InstanceClient, DispatchError> {
        let service = format!("construct:{}", description.type_name);
        if !self.rpc.service_exists(&service) {
            return Err(DispatchError::ConstructorNotFound(description.type_name));
        }

        let request = serde_json::to_value(&description)
            .map_err(|e| DispatchError::Handler(e.to_string()))?;
        let result = self
            .rpc
            .perform_call(&service, vec![request], CallOptions::default())
            .await
            .map_err(|error| match error {
                DispatchError::Handler(message) => DispatchError::from_wire(&message),
                other => other,
            })?;
        let built: InstanceDescription = serde_json::from_value(result)
            .map_err(|e| DispatchError::Handler(format!("malformed construction response: {e}")))?;

        let generator = {
            let state = self.lock();
            state
                .generators
                .get(&built.type_name)
                .or_else(|| state.generators.get("*"))
                .cloned()
        };
        let Some(generator) = generator else {
            return Err(DispatchError::Handler(format!(
                "no wrapper generator for type {}",
                built.type_name
            )));
        };
        let parts = WrapperParts {
            rpc: Arc::clone(&self.rpc),
            data: Arc::clone(&self.data),
            events: Arc::clone(&self.events),
        };
        Ok(generator.wrap(built, &parts))
    }

    /// Release one reference to an instance via its `destruct:` service.
    ///
    /// Returns whether this release actually disposed the instance (it
    /// does once the last user lets go).
    pub async fn delete_instance(self: &Arc<Self>, identifier: &str) -> Result<bool, DispatchError> {
        let service = format!("destruct:{identifier}");
        if !self.rpc.service_exists(&service) {
            return Err(DispatchError::ServiceNotFound(identifier.to_string()));
        }
        let result = self
            .rpc
            .perform_call(&service, vec![], CallOptions::default())
            .await
            .map_err(|error| match error {
                DispatchError::Handler(message) => DispatchError::from_wire(&message),
                other => other,
            })?;
        Ok(result.as_bool().unwrap_or(false))
    }

    /// Mirror one property value of a locally hosted instance into the
    /// data engine (and from there onto the wire).
    pub fn publish_property(&self, identifier: &str, property: &str, value: Value) {
        self.data
            .push_data(&format!("instances/{identifier}/properties/{property}"), value);
    }

    /// Emit one event of a locally hosted instance.
    pub fn emit_instance_event(&self, identifier: &str, event: &str, data: Value) {
        self.events.publish(
            &format!("instances/{identifier}/events/{event}"),
            data,
            vec![],
            false,
        );
    }

    /// Descriptions of locally hosted instances, in identifier order.
    #[must_use]
    pub fn local_instances(&self) -> Vec<InstanceDescription> {
        let state = self.lock();
        let mut list: Vec<InstanceDescription> = state
            .records
            .values()
            .map(|r| r.description.clone())
            .collect();
        list.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        list
    }

    /// Identifiers of every instance known anywhere in the mesh.
    #[must_use]
    pub fn known_instances(&self) -> Vec<String> {
        let state = self.lock();
        let mut ids: Vec<String> = state.view.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Current users of a locally hosted instance.
    #[must_use]
    pub fn users_of(&self, identifier: &str) -> Vec<DispatcherId> {
        self.lock()
            .records
            .get(identifier)
            .map(|r| r.used_by.clone())
            .unwrap_or_default()
    }

    /// Route an inbound instance-related message. Others are ignored.
    pub fn handle_message(&self, message: &WireMessage) {
        if let WireMessage::InstancesChanged {
            dispatcher,
            instances,
        } = message
        {
            if *dispatcher == self.local_id {
                return;
            }
            let map: HashMap<String, InstanceDescription> = instances
                .iter()
                .map(|d| (d.identifier.clone(), d.clone()))
                .collect();
            self.lock().view.set_source(dispatcher.clone(), map);
        }
    }

    /// Release local references held by departed peers.
    ///
    /// Instances hosted on a removed peer are left in place and their
    /// wrappers start failing with `PeerRemoved`; only the merged view and
    /// local user lists are cleaned up.
    pub async fn on_peers_changed(&self, change: &PeerChange) {
        for peer in &change.removed {
            let disposable = {
                let mut state = self.lock();
                state.view.remove_source(peer);
                let mut disposable = Vec::new();
                for record in state.records.values_mut() {
                    let before = record.used_by.len();
                    record.used_by.retain(|user| user != peer);
                    if record.used_by.len() != before
                        && record.used_by.is_empty()
                        && !record.manual
                    {
                        disposable.push(record.description.identifier.clone());
                    }
                }
                let mut records = Vec::new();
                for identifier in disposable {
                    if let Some(record) = state.records.remove(&identifier) {
                        records.push(record);
                    }
                }
                if !records.is_empty() {
                    Self::rebuild_local_source(&self.local_id, &mut state);
                }
                records
            };
            if disposable.is_empty() {
                continue;
            }
            for record in disposable {
                info!(
                    instance = %record.description.identifier,
                    peer = %peer,
                    "Disposing instance orphaned by peer removal"
                );
                self.teardown_record(record).await;
            }
            self.broadcast_instances();
        }
    }

    /// Tear down every local instance and constructor. Idempotent.
    pub async fn dispose(&self) {
        let (records, constructors) = {
            let mut state = self.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.building.clear();
            state.view.dispose();
            let records: Vec<InstanceRecord> =
                state.records.drain().map(|(_, record)| record).collect();
            let constructors = std::mem::take(&mut state.constructors);
            (records, constructors)
        };
        for handle in constructors {
            handle.unregister();
        }
        for record in records {
            self.teardown_record(record).await;
        }
    }

    /// Hosting-side construction with de-duplication.
    async fn construct_local(
        self: &Arc<Self>,
        factory: &Arc<dyn InstanceFactory>,
        description: InstanceDescription,
        requested_by: DispatcherId,
    ) -> Result<InstanceDescription, DispatchError> {
        let identifier = description.identifier.clone();
        let hash = creation_hash(&description);

        enum Plan {
            Existing(InstanceDescription),
            Wait(watch::Receiver<BuildPhase>),
            Build(watch::Sender<BuildPhase>),
        }

        let plan = {
            let mut state = self.lock();
            if state.disposed {
                return Err(DispatchError::Cancelled("dispatcher disposed".to_string()));
            }
            if let Some(record) = state.records.get_mut(&identifier) {
                if record.creation_hash != hash {
                    return Err(DispatchError::ParameterMismatch(identifier));
                }
                if !record.used_by.contains(&requested_by) {
                    record.used_by.push(requested_by.clone());
                }
                Plan::Existing(record.description.clone())
            } else if let Some(building) = state.building.get(&identifier) {
                if building.hash != hash {
                    return Err(DispatchError::ParameterMismatch(identifier));
                }
                Plan::Wait(building.phase.clone())
            } else {
                let (tx, rx) = watch::channel(BuildPhase::Building);
                state
                    .building
                    .insert(identifier.clone(), UnderConstruction { hash, phase: rx });
                Plan::Build(tx)
            }
        };

        match plan {
            Plan::Existing(existing) => {
                debug!(instance = %identifier, user = %requested_by, "Joined existing instance");
                Ok(existing)
            }
            Plan::Wait(mut phase) => {
                let outcome = phase
                    .wait_for(|p| !matches!(p, BuildPhase::Building))
                    .await
                    .map(|p| p.clone())
                    .unwrap_or(BuildPhase::Failed("construction abandoned".to_string()));
                match outcome {
                    BuildPhase::Ready => {
                        let mut state = self.lock();
                        let Some(record) = state.records.get_mut(&identifier) else {
                            return Err(DispatchError::ServiceNotFound(identifier));
                        };
                        if !record.used_by.contains(&requested_by) {
                            record.used_by.push(requested_by);
                        }
                        Ok(record.description.clone())
                    }
                    BuildPhase::Failed(error) => Err(DispatchError::from_wire(&error)),
                    BuildPhase::Building => unreachable!("wait_for filtered Building"),
                }
            }
            Plan::Build(phase) => {
                let result = self
                    .build_instance(factory, &identifier, description, hash, requested_by)
                    .await;
                match &result {
                    Ok(_) => {
                        let _ = phase.send(BuildPhase::Ready);
                    }
                    Err(error) => {
                        self.lock().building.remove(&identifier);
                        let _ = phase.send(BuildPhase::Failed(error.to_wire()));
                    }
                }
                result
            }
        }
    }

    async fn build_instance(
        self: &Arc<Self>,
        factory: &Arc<dyn InstanceFactory>,
        identifier: &str,
        description: InstanceDescription,
        hash: [u8; 32],
        requested_by: DispatcherId,
    ) -> Result<InstanceDescription, DispatchError> {
        let host = factory
            .construct(identifier, description.params.clone())
            .await
            .map_err(DispatchError::Handler)?;

        let mut built = host.describe();
        built.identifier = identifier.to_string();
        built.type_name = description.type_name;
        built.params = description.params;

        let services = self.register_instance_services(identifier)?;
        {
            let mut state = self.lock();
            state.records.insert(
                identifier.to_string(),
                InstanceRecord {
                    description: built.clone(),
                    host,
                    used_by: vec![requested_by],
                    manual: false,
                    creation_hash: hash,
                    services,
                },
            );
            state.building.remove(identifier);
            Self::rebuild_local_source(&self.local_id, &mut state);
        }
        info!(instance = %identifier, "Instance constructed");
        self.broadcast_instances();
        Ok(built)
    }

    /// Register the per-instance `destruct:` and `call:` services.
    fn register_instance_services(
        self: &Arc<Self>,
        identifier: &str,
    ) -> Result<Vec<ServiceHandle>, DispatchError> {
        let destructor = {
            let manager = Arc::downgrade(self);
            let identifier = identifier.to_string();
            service_fn(move |_params, ctx| {
                let manager = Weak::clone(&manager);
                let identifier = identifier.clone();
                async move {
                    let Some(manager) = manager.upgrade() else {
                        return Err("dispatcher disposed".to_string());
                    };
                    let disposed = manager.release_instance(&identifier, &ctx.requested_by).await;
                    Ok(json!(disposed))
                }
            })
        };
        let dispatcher = {
            let manager = Arc::downgrade(self);
            let identifier = identifier.to_string();
            service_fn(move |params, _ctx| {
                let manager = Weak::clone(&manager);
                let identifier = identifier.clone();
                async move {
                    let Some(manager) = manager.upgrade() else {
                        return Err("dispatcher disposed".to_string());
                    };
                    let mut params = params.into_iter();
                    let method = params
                        .next()
                        .and_then(|v| v.as_str().map(str::to_string))
                        .ok_or_else(|| "missing method name".to_string())?;
                    manager
                        .invoke_local(&identifier, &method, params.collect())
                        .await
                }
            })
        };

        let destruct_handle = self.rpc.register_service(
            ServiceDescriptor::named(format!("destruct:{identifier}")),
            destructor,
        )?;
        let call_handle = match self.rpc.register_service(
            ServiceDescriptor::named(format!("call:{identifier}")),
            dispatcher,
        ) {
            Ok(handle) => handle,
            Err(error) => {
                destruct_handle.unregister();
                return Err(error);
            }
        };
        Ok(vec![destruct_handle, call_handle])
    }

    async fn invoke_local(
        &self,
        identifier: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, String> {
        let host = self
            .lock()
            .records
            .get(identifier)
            .map(|r| Arc::clone(&r.host));
        let Some(host) = host else {
            return Err(DispatchError::ServiceNotFound(identifier.to_string()).to_wire());
        };
        host.invoke(method, args).await
    }

    /// Pop one user; dispose when the list empties (manual instances are
    /// exempt). Returns whether disposal happened.
    async fn release_instance(&self, identifier: &str, requester: &DispatcherId) -> bool {
        let record = {
            let mut state = self.lock();
            let Some(mut record) = state.records.remove(identifier) else {
                warn!(instance = %identifier, "Destruct for unknown instance ignored");
                return false;
            };
            if let Some(pos) = record.used_by.iter().position(|user| user == requester) {
                record.used_by.remove(pos);
            }
            if record.manual || !record.used_by.is_empty() {
                state.records.insert(identifier.to_string(), record);
                return false;
            }
            Self::rebuild_local_source(&self.local_id, &mut state);
            record
        };
        info!(instance = %identifier, "Last user released, disposing");
        self.teardown_record(record).await;
        self.broadcast_instances();
        true
    }

    async fn teardown_record(&self, record: InstanceRecord) {
        for handle in record.services {
            handle.unregister();
        }
        record.host.dispose().await;
    }

    fn insert_record(self: &Arc<Self>, record: InstanceRecord) {
        let mut state = self.lock();
        state
            .records
            .insert(record.description.identifier.clone(), record);
        Self::rebuild_local_source(&self.local_id, &mut state);
    }

    fn broadcast_instances(&self) {
        let instances = self.local_instances();
        let message = WireMessage::InstancesChanged {
            dispatcher: self.local_id.clone(),
            instances,
        };
        if self.outbound.send(message).is_err() {
            debug!("Outbound channel closed, dropping instances broadcast");
        }
    }

    fn rebuild_local_source(local_id: &DispatcherId, state: &mut InstState) {
        let map: HashMap<String, InstanceDescription> = state
            .records
            .iter()
            .map(|(id, record)| (id.clone(), record.description.clone()))
            .collect();
        state.view.set_source(local_id.clone(), map);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InstState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
