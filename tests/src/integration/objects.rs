//! # Distributed Instances
//!
//! Full lifecycle across cores: construct on the host, wrap on the
//! consumers, reference counting through `destruct:`, property mirroring.

#[cfg(test)]
mod tests {
    use crate::support::{settle, TestMesh};
    use async_trait::async_trait;
    use dm_instances::{InstanceFactory, InstanceHost};
    use dm_types::{DispatchError, DispatcherId, InstanceDescription};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct Counter {
        identifier: String,
        params: Value,
        value: Mutex<i64>,
        disposals: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl InstanceHost for Counter {
        async fn invoke(&self, method: &str, _args: Vec<Value>) -> Result<Value, String> {
            match method {
                "increment" => {
                    let mut value = self.value.lock().unwrap();
                    *value += 1;
                    Ok(json!(*value))
                }
                other => Err(format!("no such method: {other}")),
            }
        }

        fn describe(&self) -> InstanceDescription {
            InstanceDescription {
                type_name: "counter".into(),
                identifier: self.identifier.clone(),
                params: self.params.clone(),
                methods: vec!["increment".into()],
                properties: vec!["value".into()],
                events: vec!["changed".into()],
            }
        }

        async fn dispose(&self) {
            self.disposals.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct CounterFactory {
        constructions: Arc<AtomicUsize>,
        disposals: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl InstanceFactory for CounterFactory {
        async fn construct(
            &self,
            identifier: &str,
            params: Value,
        ) -> Result<Arc<dyn InstanceHost>, String> {
            self.constructions.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Counter {
                identifier: identifier.to_string(),
                params,
                value: Mutex::new(0),
                disposals: Arc::clone(&self.disposals),
            }))
        }
    }

    struct Counters {
        constructions: Arc<AtomicUsize>,
        disposals: Arc<AtomicUsize>,
    }

    fn host_counters(mesh: &TestMesh, on: &str) -> Counters {
        let constructions = Arc::new(AtomicUsize::new(0));
        let disposals = Arc::new(AtomicUsize::new(0));
        mesh.core(on)
            .instances()
            .register_constructor(
                "counter",
                Arc::new(CounterFactory {
                    constructions: Arc::clone(&constructions),
                    disposals: Arc::clone(&disposals),
                }),
            )
            .unwrap();
        Counters {
            constructions,
            disposals,
        }
    }

    fn request(identifier: &str) -> InstanceDescription {
        InstanceDescription::request("counter", identifier, json!({"start": 0}))
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_construction_and_method_calls() {
        let mesh = TestMesh::start(&["a", "b"]).await;
        let counters = host_counters(&mesh, "a");
        settle(50).await;

        let client = mesh
            .core("b")
            .instances()
            .create_instance(request("c1"))
            .await
            .unwrap();
        assert_eq!(client.call("increment", vec![]).await.unwrap(), json!(1));
        assert_eq!(client.call("increment", vec![]).await.unwrap(), json!(2));
        assert_eq!(counters.constructions.load(Ordering::SeqCst), 1);

        // The host tracks who asked.
        assert_eq!(
            mesh.core("a").instances().users_of("c1"),
            vec![DispatcherId::new("b")]
        );
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_constructor_fails_fast() {
        let mesh = TestMesh::start(&["a", "b"]).await;
        let err = mesh
            .core("b")
            .instances()
            .create_instance(request("c1"))
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::ConstructorNotFound("counter".into()));
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_consumers_share_one_instance() {
        let mesh = TestMesh::start(&["a", "b", "c"]).await;
        let counters = host_counters(&mesh, "a");
        settle(50).await;

        let from_b = mesh
            .core("b")
            .instances()
            .create_instance(request("c1"))
            .await
            .unwrap();
        let from_c = mesh
            .core("c")
            .instances()
            .create_instance(request("c1"))
            .await
            .unwrap();
        assert_eq!(counters.constructions.load(Ordering::SeqCst), 1);
        assert_eq!(mesh.core("a").instances().users_of("c1").len(), 2);

        // State is shared, not copied.
        assert_eq!(from_b.call("increment", vec![]).await.unwrap(), json!(1));
        assert_eq!(from_c.call("increment", vec![]).await.unwrap(), json!(2));
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_differing_params_rejected() {
        let mesh = TestMesh::start(&["a", "b", "c"]).await;
        host_counters(&mesh, "a");
        settle(50).await;

        mesh.core("b")
            .instances()
            .create_instance(request("c1"))
            .await
            .unwrap();
        let err = mesh
            .core("c")
            .instances()
            .create_instance(InstanceDescription::request(
                "counter",
                "c1",
                json!({"start": 99}),
            ))
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::ParameterMismatch("c1".into()));
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_refcounted_deletion_disposes_once() {
        let mesh = TestMesh::start(&["a", "b", "c"]).await;
        let counters = host_counters(&mesh, "a");
        settle(50).await;

        for id in ["b", "c"] {
            mesh.core(id)
                .instances()
                .create_instance(request("c1"))
                .await
                .unwrap();
        }

        // First release keeps the instance alive for the second user.
        assert!(!mesh
            .core("b")
            .instances()
            .delete_instance("c1")
            .await
            .unwrap());
        assert_eq!(counters.disposals.load(Ordering::SeqCst), 0);

        // Last release disposes exactly once and the services vanish.
        assert!(mesh
            .core("c")
            .instances()
            .delete_instance("c1")
            .await
            .unwrap());
        settle(50).await;
        assert_eq!(counters.disposals.load(Ordering::SeqCst), 1);
        assert!(!mesh.core("b").rpc().service_exists("destruct:c1"));
        assert!(!mesh.core("b").rpc().service_exists("call:c1"));
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_departed_consumer_releases_its_reference() {
        let mesh = TestMesh::start(&["a", "b"]).await;
        let counters = host_counters(&mesh, "a");
        settle(50).await;

        mesh.core("b")
            .instances()
            .create_instance(request("c1"))
            .await
            .unwrap();
        assert_eq!(mesh.core("a").instances().users_of("c1").len(), 1);

        // Silence "b" until "a" evicts it; its reference goes with it.
        mesh.core("b").dispose().await;
        settle(2_000).await;
        assert!(mesh.core("a").instances().local_instances().is_empty());
        assert_eq!(counters.disposals.load(Ordering::SeqCst), 1);
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_property_mirror_reaches_consumers() {
        let mesh = TestMesh::start(&["a", "b"]).await;
        host_counters(&mesh, "a");
        settle(50).await;

        let client = mesh
            .core("b")
            .instances()
            .create_instance(request("c1"))
            .await
            .unwrap();
        assert_eq!(client.property("value").unwrap(), Value::Null);

        mesh.core("a")
            .instances()
            .publish_property("c1", "value", json!(5));
        settle(50).await;
        assert_eq!(client.property("value").unwrap(), json!(5));
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_instance_events_reach_consumers() {
        let mesh = TestMesh::start(&["a", "b"]).await;
        host_counters(&mesh, "a");
        settle(50).await;

        let client = mesh
            .core("b")
            .instances()
            .create_instance(request("c1"))
            .await
            .unwrap();
        let mut changed = client.on_event("changed").unwrap();

        mesh.core("a")
            .instances()
            .emit_instance_event("c1", "changed", json!({"value": 1}));
        settle(50).await;
        let notice = changed.try_recv().expect("event mirrored across the wire");
        assert_eq!(notice.change.data, json!({"value": 1}));
        mesh.shutdown().await;
    }
}
