//! # Remote Calls
//!
//! Service registration visibility, selector strategies, timeout and
//! peer-loss behavior, all across real cores.

#[cfg(test)]
mod tests {
    use crate::support::{settle, TestMesh};
    use dm_rpc::service_fn;
    use dm_types::{CallOptions, DispatchError, DispatcherId, ServiceDescriptor, TargetSelector};
    use serde_json::{json, Value};
    use std::future::pending;
    use std::sync::Arc;

    /// Register a service whose reply names the dispatcher that ran it.
    fn register_whoami(mesh: &TestMesh, on: &str) {
        let id = on.to_string();
        mesh.core(on)
            .rpc()
            .register_service(
                ServiceDescriptor::named("whoami"),
                service_fn(move |_params, _ctx| {
                    let id = id.clone();
                    async move { Ok(json!(id)) }
                }),
            )
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_is_visible_mesh_wide() {
        let mesh = TestMesh::start(&["a", "b"]).await;
        assert!(!mesh.core("b").rpc().service_exists("whoami"));

        register_whoami(&mesh, "a");
        settle(50).await;
        assert!(mesh.core("b").rpc().service_exists("whoami"));

        mesh.core("a").rpc().unregister_service("whoami");
        settle(50).await;
        assert!(!mesh.core("b").rpc().service_exists("whoami"));
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_selector_takes_lowest_provider() {
        let mesh = TestMesh::start(&["a", "b", "c"]).await;
        register_whoami(&mesh, "c");
        register_whoami(&mesh, "b");
        settle(50).await;

        let ran_on = mesh.core("a").call("whoami", vec![]).await.unwrap();
        assert_eq!(ran_on, json!("b"));
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatcher_selector_pins_target() {
        let mesh = TestMesh::start(&["a", "b", "c"]).await;
        register_whoami(&mesh, "b");
        register_whoami(&mesh, "c");
        settle(50).await;

        let ran_on = mesh
            .core("a")
            .rpc()
            .perform_call(
                "whoami",
                vec![],
                CallOptions::on_dispatcher(DispatcherId::new("c")),
            )
            .await
            .unwrap();
        assert_eq!(ran_on, json!("c"));
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_master_selector_requires_master_provider() {
        let mesh = TestMesh::start(&["a", "b"]).await;
        // "a" joined first and holds mastership.
        register_whoami(&mesh, "b");
        settle(50).await;

        let options = CallOptions {
            selector: TargetSelector::Master,
            ..CallOptions::default()
        };
        let err = mesh
            .core("b")
            .rpc()
            .perform_call("whoami", vec![], options.clone())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::AssignmentInvalid { .. }));

        register_whoami(&mesh, "a");
        settle(50).await;
        let ran_on = mesh
            .core("b")
            .rpc()
            .perform_call("whoami", vec![], options)
            .await
            .unwrap();
        assert_eq!(ran_on, json!("a"));
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_error_crosses_the_wire() {
        let mesh = TestMesh::start(&["a", "b"]).await;
        mesh.core("b")
            .rpc()
            .register_service(
                ServiceDescriptor::named("flaky"),
                service_fn(|_params, _ctx| async move { Err("disk on fire".to_string()) }),
            )
            .unwrap();
        settle(50).await;

        let err = mesh.core("a").call("flaky", vec![]).await.unwrap_err();
        assert_eq!(err, DispatchError::Handler("disk on fire".into()));
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_call_times_out() {
        let mesh = TestMesh::start(&["a", "b"]).await;
        mesh.core("b")
            .rpc()
            .register_service(
                ServiceDescriptor::named("stuck"),
                service_fn(|_params, _ctx| async move { pending::<Result<Value, String>>().await }),
            )
            .unwrap();
        settle(50).await;

        let err = mesh
            .core("a")
            .rpc()
            .perform_call("stuck", vec![], CallOptions::with_timeout(250))
            .await
            .unwrap_err();
        assert_eq!(err, DispatchError::Timeout(250));
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_call_rejected_when_peer_vanishes() {
        let mesh = TestMesh::start(&["a", "b"]).await;
        mesh.core("b")
            .rpc()
            .register_service(
                ServiceDescriptor::named("stuck"),
                service_fn(|_params, _ctx| async move { pending::<Result<Value, String>>().await }),
            )
            .unwrap();
        settle(50).await;

        let a = mesh.core("a").clone();
        let call = tokio::spawn(async move {
            a.rpc()
                .perform_call("stuck", vec![], CallOptions::default())
                .await
        });
        settle(50).await;

        // Silence "b" until "a" evicts it.
        mesh.core("b").dispose().await;
        settle(2_000).await;

        assert_eq!(
            call.await.unwrap().unwrap_err(),
            DispatchError::PeerRemoved(DispatcherId::new("b"))
        );
        // Its services left the merged view with it.
        assert!(!mesh.core("a").rpc().service_exists("stuck"));
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_reaches_remote_executor() {
        let mesh = TestMesh::start(&["a", "b"]).await;
        let (seen_tx, seen_rx) = tokio::sync::oneshot::channel::<()>();
        let seen_tx = Arc::new(std::sync::Mutex::new(Some(seen_tx)));
        mesh.core("b")
            .rpc()
            .register_service(
                ServiceDescriptor::named("patient"),
                service_fn(move |_params, mut ctx| {
                    let seen = seen_tx.lock().unwrap().take();
                    async move {
                        ctx.cancelled().await;
                        if let Some(tx) = seen {
                            let _ = tx.send(());
                        }
                        Err("Cancelled: caller gave up".to_string())
                    }
                }),
            )
            .unwrap();
        settle(50).await;

        let a = mesh.core("a").clone();
        let call = tokio::spawn(async move {
            a.rpc()
                .perform_call("patient", vec![], CallOptions::default())
                .await
        });
        settle(50).await;

        let task_id = mesh.core("a").rpc().pending_tasks()[0];
        mesh.core("a").rpc().cancel_task(task_id, "caller gave up");
        settle(50).await;

        // The caller stops waiting immediately; the executor observes the
        // broadcast through its context flag.
        assert_eq!(
            call.await.unwrap().unwrap_err(),
            DispatchError::Cancelled("caller gave up".into())
        );
        seen_rx.await.expect("executor observed cancellation");
        mesh.shutdown().await;
    }
}
