//! # Dispatcher Node
//!
//! Demo entry point: two dispatcher cores on an in-process loopback
//! network, one registering a service and hosting an instance, the other
//! calling both. Shows the full wiring without an external transport.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use dispatcher_runtime::config::{DispatcherSection, RuntimeConfig};
use dispatcher_runtime::{DispatcherCore, LoopbackNetwork};
use dm_instances::InstanceHost;
use dm_rpc::service_fn;
use dm_types::{InstanceDescription, ServiceDescriptor};

struct Greeter;

#[async_trait]
impl InstanceHost for Greeter {
    async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, String> {
        match method {
            "greet" => {
                let name = args
                    .first()
                    .and_then(Value::as_str)
                    .unwrap_or("world")
                    .to_string();
                Ok(json!(format!("hello, {name}")))
            }
            other => Err(format!("no such method: {other}")),
        }
    }

    fn describe(&self) -> InstanceDescription {
        InstanceDescription {
            type_name: "greeter".into(),
            identifier: "greeter-1".into(),
            params: Value::Null,
            methods: vec!["greet".into()],
            properties: vec![],
            events: vec![],
        }
    }

    async fn dispose(&self) {}
}

struct GreeterFactory;

#[async_trait]
impl dm_instances::InstanceFactory for GreeterFactory {
    async fn construct(
        &self,
        _identifier: &str,
        _params: Value,
    ) -> Result<Arc<dyn InstanceHost>, String> {
        Ok(Arc::new(Greeter))
    }
}

fn config(id: &str) -> RuntimeConfig {
    RuntimeConfig {
        dispatcher: DispatcherSection {
            id: Some(id.to_string()),
            ..DispatcherSection::default()
        },
        ..RuntimeConfig::default()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let network = LoopbackNetwork::new();
    let alpha = DispatcherCore::start(&config("alpha"), network.attach())?;
    let beta = DispatcherCore::start(&config("beta"), network.attach())?;

    // Let discovery heartbeats propagate.
    tokio::time::sleep(Duration::from_millis(700)).await;
    info!(
        peers = alpha.connectivity().known_ids().len(),
        master = ?alpha.connectivity().master(),
        "Mesh formed"
    );

    alpha
        .rpc()
        .register_service(
            ServiceDescriptor::named("math/add"),
            service_fn(|params, _ctx| async move {
                let sum: i64 = params.iter().filter_map(Value::as_i64).sum();
                Ok(json!(sum))
            }),
        )
        .map_err(|e| anyhow::anyhow!(e))?;
    alpha
        .instances()
        .register_constructor("greeter", Arc::new(GreeterFactory))
        .map_err(|e| anyhow::anyhow!(e))?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let sum = beta
        .call("math/add", vec![json!(20), json!(22)])
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    info!(%sum, "Remote call answered");

    let greeter = beta
        .instances()
        .create_instance(InstanceDescription::request("greeter", "greeter-1", Value::Null))
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    let greeting = greeter
        .call("greet", vec![json!("mesh")])
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    info!(%greeting, "Instance call answered");

    beta.dispose().await;
    alpha.dispose().await;
    Ok(())
}
