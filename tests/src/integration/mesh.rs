//! # Mesh Formation
//!
//! Discovery via bonjour/status exchange, the peer health state machine,
//! and master election with forcing.

#[cfg(test)]
mod tests {
    use crate::support::{fast_config, settle, TestMesh};
    use dispatcher_runtime::config::RuntimeConfig;
    use dm_connectivity::ConnectivityConfig;
    use dm_types::{DispatcherId, HealthState};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_three_cores_discover_each_other() {
        let mesh = TestMesh::start(&["a", "b", "c"]).await;

        for core in &mesh.cores {
            assert_eq!(
                core.connectivity().known_ids(),
                vec![
                    DispatcherId::new("a"),
                    DispatcherId::new("b"),
                    DispatcherId::new("c"),
                ],
                "every core sees the full mesh"
            );
            assert!(core.ready());
        }
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_joiner_is_discovered() {
        let mesh = TestMesh::start(&["a", "b"]).await;

        let late = dispatcher_runtime::DispatcherCore::start(
            &fast_config("z-late"),
            mesh.network.attach(),
        )
        .unwrap();
        settle(200).await;

        assert!(mesh
            .core("a")
            .connectivity()
            .known_ids()
            .contains(&DispatcherId::new("z-late")));
        assert_eq!(late.connectivity().known_ids().len(), 3);

        late.dispose().await;
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_eldest_dispatcher_is_master() {
        let mesh = TestMesh::start(&["b", "a", "c"]).await;

        // "b" joined first; all cores agree on it.
        for core in &mesh.cores {
            assert_eq!(core.connectivity().master(), Some(DispatcherId::new("b")));
        }
        assert!(mesh.core("b").connectivity().is_master());
        assert!(!mesh.core("a").connectivity().is_master());
        mesh.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_master_overrides_uptime() {
        let mesh = TestMesh::start(&["a", "b", "c"]).await;
        assert_eq!(
            mesh.core("b").connectivity().master(),
            Some(DispatcherId::new("a"))
        );

        mesh.core("c").connectivity().force_master(true);
        settle(200).await;
        for core in &mesh.cores {
            assert_eq!(core.connectivity().master(), Some(DispatcherId::new("c")));
        }

        mesh.core("c").connectivity().force_master(false);
        settle(200).await;
        assert_eq!(
            mesh.core("b").connectivity().master(),
            Some(DispatcherId::new("a"))
        );
        mesh.shutdown().await;
    }

    fn threshold_config(id: &str) -> RuntimeConfig {
        RuntimeConfig {
            connectivity: ConnectivityConfig {
                send_alive_interval: Duration::from_millis(100),
                check_interval: Duration::from_millis(100),
                slow: Duration::from_millis(500),
                warn: Duration::from_millis(1_000),
                dead: Duration::from_millis(2_000),
                remove: Duration::from_millis(3_000),
            },
            ..fast_config(id)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_walks_the_health_ladder() {
        let mesh = TestMesh::start_with(&["a", "b"], threshold_config).await;
        let a = mesh.core("a").clone();
        let b_id = DispatcherId::new("b");
        assert_eq!(
            a.connectivity().peer(&b_id).unwrap().health,
            HealthState::Healthy
        );

        // Silence "b": its heartbeats stop, no goodbye is sent.
        mesh.core("b").dispose().await;

        settle(600).await;
        assert_eq!(
            a.connectivity().peer(&b_id).unwrap().health,
            HealthState::Slow
        );

        settle(600).await; // ~1200ms of silence
        assert_eq!(
            a.connectivity().peer(&b_id).unwrap().health,
            HealthState::Warning
        );

        settle(1_300).await; // ~2500ms: dead but still listed
        assert_eq!(
            a.connectivity().peer(&b_id).unwrap().health,
            HealthState::Dead
        );
        assert!(a.connectivity().known_ids().contains(&b_id));

        settle(600).await; // ~3100ms: evicted entirely
        assert!(a.connectivity().peer(&b_id).is_none());
        assert!(!a.connectivity().known_ids().contains(&b_id));

        a.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_dead_peers_do_not_win_election() {
        let mesh = TestMesh::start_with(&["a", "b"], threshold_config).await;
        // "a" joined first and is master.
        assert!(mesh.core("a").connectivity().is_master());

        let b = mesh.core("b").clone();
        mesh.core("a").dispose().await;
        settle(2_600).await; // "a" is Dead now

        assert_eq!(b.connectivity().master(), Some(DispatcherId::new("b")));
        b.dispose().await;
    }
}
