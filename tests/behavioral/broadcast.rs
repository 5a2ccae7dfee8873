// ABOUTME: Behavioral tests for fan-out operations: outcome isolation, reconfigure and artifact capture

use std::sync::Arc;

use session_fleet::fleet::{
    ArtifactCache, ArtifactCacheConfig, BatchOperator, ErrorKind, NoRetry, SessionContext,
    SessionId, SessionPool, StatsObserver, TargetDescriptor, TransportError,
};

use super::fixtures::{fleet, pool_config};

async fn connected_fleet(hosts: &[&str]) -> (Arc<SessionPool>, Vec<SessionId>) {
    let (pool, _) = fleet(pool_config(20, 0), Arc::new(NoRetry)).unwrap();
    let ids: Vec<SessionId> = hosts
        .iter()
        .map(|host| pool.create_session(TargetDescriptor::new(*host)).unwrap())
        .collect();
    pool.connect_all(0).await.unwrap();
    (Arc::new(pool), ids)
}

/// Five targets, one failing: five entries, four successes, no error for the caller.
#[tokio::test(start_paused = true)]
async fn test_broadcast_isolates_one_failure() {
    let (pool, ids) =
        connected_fleet(&["desk-1", "desk-2", "desk-3", "desk-4", "desk-5"]).await;
    let operator = BatchOperator::new(Arc::clone(&pool));
    let unlucky = ids[2];

    let result = operator
        .broadcast(
            move |ctx: SessionContext| async move {
                if ctx.id == unlucky {
                    Err(TransportError::recoverable("screen locked"))
                } else {
                    Ok(())
                }
            },
            &ids,
        )
        .await
        .unwrap();

    assert_eq!(result.len(), 5);
    assert_eq!(result.success_count(), 4);
    assert_eq!(result.failure_count(), 1);
    let failure = result.get(unlucky).unwrap().error.clone().unwrap();
    assert_eq!(failure.kind, ErrorKind::RecoverableTransport);
    assert_eq!(failure.message, "screen locked");
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_without_ids_targets_connected_sessions_only() {
    let (pool, ids) = connected_fleet(&["desk-1", "down-2", "desk-3"]).await;
    let operator = BatchOperator::new(Arc::clone(&pool));

    let result = operator
        .broadcast_collect(
            |ctx: SessionContext| async move { Ok(ctx.target.host().to_string()) },
            &[],
        )
        .await
        .unwrap();

    assert_eq!(result.len(), 2);
    assert!(result.get(ids[1]).is_none());
    let values = result.into_values();
    assert_eq!(values[&ids[0]], "desk-1");
    assert_eq!(values[&ids[2]], "desk-3");
}

#[tokio::test(start_paused = true)]
async fn test_broadcast_reports_unknown_and_disconnected_targets() {
    let (pool, ids) = connected_fleet(&["desk-1", "down-2"]).await;
    let operator = BatchOperator::new(Arc::clone(&pool));
    let ghost = SessionId(999);

    let result = operator
        .broadcast(|_ctx: SessionContext| async { Ok(()) }, &[ids[0], ids[1], ghost, ids[0]])
        .await
        .unwrap();

    // Duplicates collapse to one entry per target
    assert_eq!(result.len(), 3);
    assert!(result.get(ids[0]).unwrap().is_success());
    assert_eq!(
        result.get(ids[1]).unwrap().error.as_ref().map(|f| f.kind),
        Some(ErrorKind::RecoverableTransport)
    );
    assert_eq!(
        result.get(ghost).unwrap().error.as_ref().map(|f| f.kind),
        Some(ErrorKind::InvalidConfiguration)
    );
}

#[tokio::test(start_paused = true)]
async fn test_panicking_operation_becomes_a_failure_entry() {
    let (pool, ids) = connected_fleet(&["desk-1", "desk-2"]).await;
    let operator = BatchOperator::new(Arc::clone(&pool));
    let victim = ids[0];

    let result = operator
        .broadcast(
            move |ctx: SessionContext| async move {
                assert_ne!(ctx.id, victim, "simulated operation bug");
                Ok(())
            },
            &[],
        )
        .await
        .unwrap();

    assert_eq!(result.len(), 2);
    assert!(!result.get(victim).unwrap().is_success());
    assert!(result.get(ids[1]).unwrap().is_success());
}

#[tokio::test(start_paused = true)]
async fn test_reconfigure_all_counts_and_reports_rejections() {
    let (pool, _) = connected_fleet(&["desk-1", "rigid-2", "desk-3"]).await;
    let stats = Arc::new(StatsObserver::new());
    pool.attach(stats.clone());
    let operator = BatchOperator::new(Arc::clone(&pool));

    let applied = operator
        .reconfigure_all(&serde_json::json!({ "resolution": "1920x1080" }), &[])
        .await
        .unwrap();

    assert_eq!(applied, 2);
    assert_eq!(stats.failures(ErrorKind::InvalidConfiguration), 1);
}

#[tokio::test(start_paused = true)]
async fn test_capture_artifacts_fills_the_cache() {
    let (pool, ids) = connected_fleet(&["desk-1", "desk-2", "down-3"]).await;
    let operator = BatchOperator::new(Arc::clone(&pool));
    let cache = ArtifactCache::new(&ArtifactCacheConfig {
        capacity: 8,
        buffer_pool_size: 4,
        buffer_capacity: 256,
    })
    .unwrap();

    let result = operator
        .capture_artifacts(
            "snapshot",
            |ctx: SessionContext| async move {
                serde_json::to_vec(&ctx.transport.snapshot())
                    .map_err(|e| TransportError::new(e.to_string()))
            },
            &[],
            &cache,
        )
        .await
        .unwrap();

    assert_eq!(result.success_count(), 2);
    assert_eq!(cache.len(), 2);
    assert!(!cache.contains(ids[2], "snapshot"));

    let bytes = cache.get(ids[0], "snapshot").unwrap();
    let snapshot: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(snapshot["host"], "desk-1");
    assert_eq!(result.get(ids[0]).unwrap().value, Some(bytes.len()));
}

#[tokio::test(start_paused = true)]
async fn test_health_snapshot_has_no_side_effects() {
    let (pool, _) = connected_fleet(&["desk-1", "down-2"]).await;
    let operator = BatchOperator::new(Arc::clone(&pool));

    let first = operator.health_snapshot();
    let second = operator.health_snapshot();

    assert_eq!(first.total_sessions, 2);
    assert_eq!(first.connected, 1);
    assert!(first.status.is_critical());
    assert_eq!(first.by_state, second.by_state);
    assert_eq!(pool.len(), 2);
}
