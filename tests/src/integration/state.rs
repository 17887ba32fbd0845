//! # Shared State and Events
//!
//! Retained data replication, topic wildcards and hierarchical forwarding
//! across dispatcher boundaries.

#[cfg(test)]
mod tests {
    use crate::support::{settle, TestMesh};
    use dm_pubsub::RegisterOptions;
    use serde_json::{json, Value};

    #[tokio::test(start_paused = true)]
    async fn test_pushed_data_is_pulled_everywhere() {
        let mesh = TestMesh::start(&["a", "b", "c"]).await;

        mesh.core("a").data().push_data("config/mode", json!("active"));
        settle(50).await;

        for id in ["b", "c"] {
            assert_eq!(
                mesh.core(id).data().pull_data("config/mode", Value::Null),
                json!("active"),
                "late pull on {id} sees the retained value"
            );
        }
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_writer_wins_across_cores() {
        let mesh = TestMesh::start(&["a", "b"]).await;

        mesh.core("a").data().push_data("jobs/count", json!(1));
        settle(50).await;
        mesh.core("b").data().push_data("jobs/count", json!(2));
        settle(50).await;

        assert_eq!(
            mesh.core("a").data().pull_data("jobs/count", Value::Null),
            json!(2)
        );
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_wildcard_subscription_spans_the_wire() {
        let mesh = TestMesh::start(&["a", "b"]).await;
        let mut sensor = mesh
            .core("b")
            .events()
            .register(RegisterOptions::subscribe("sensors/+/temp"))
            .unwrap();

        mesh.core("a")
            .events()
            .publish("sensors/s1/temp", json!(21.5), vec![], false);
        settle(50).await;

        let notice = sensor.try_recv().expect("wildcard matched remote publish");
        assert_eq!(notice.change.path, "sensors/s1/temp");
        assert_eq!(notice.change.data, json!(21.5));
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_forwarding_projects_remote_updates() {
        let mesh = TestMesh::start(&["a", "b"]).await;
        let mut parent = mesh
            .core("b")
            .events()
            .register(RegisterOptions::subscribe("config").with_child_forwarding())
            .unwrap();

        mesh.core("a")
            .events()
            .publish("config/mode", json!("active"), vec![], false);
        settle(50).await;

        let notice = parent.try_recv().expect("child update forwarded to parent");
        assert_eq!(notice.change.data, json!({"mode": "active"}));
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_events_are_not_echoed_back() {
        let mesh = TestMesh::start(&["a", "b"]).await;
        let mut a_sub = mesh
            .core("a")
            .events()
            .register(RegisterOptions::subscribe("ping"))
            .unwrap();

        mesh.core("b").events().publish("ping", json!(1), vec![], false);
        settle(100).await;

        // "a" sees the event exactly once: the relay did not bounce it
        // back onto the wire for another round.
        assert!(a_sub.try_recv().is_some());
        assert!(a_sub.try_recv().is_none());
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_counts_follow_registrations() {
        let mesh = TestMesh::start(&["a", "b", "c"]).await;
        use dm_rpc::service_fn;
        use dm_types::ServiceDescriptor;

        for id in ["b", "c"] {
            mesh.core(id)
                .rpc()
                .register_service(
                    ServiceDescriptor::named("echo"),
                    service_fn(|params, _ctx| async move { Ok(json!(params)) }),
                )
                .unwrap();
        }
        settle(50).await;

        let a = mesh.core("a").rpc();
        assert_eq!(a.providers("echo").len(), 2);

        mesh.core("c").rpc().unregister_service("echo");
        settle(50).await;
        assert_eq!(a.providers("echo").len(), 1);

        mesh.core("b").rpc().unregister_service("echo");
        settle(50).await;
        assert!(!a.service_exists("echo"));
        mesh.shutdown().await;
    }
}
