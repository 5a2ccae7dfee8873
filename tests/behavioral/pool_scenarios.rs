// ABOUTME: Behavioral tests for pool capacity, bounded-concurrency connect, retry timing and cleanup

use std::sync::Arc;
use std::time::Duration;

use session_fleet::fleet::{
    ChannelObserver, ErrorKind, FixedDelay, FleetError, FleetEvent, NoRetry, SessionState,
    TargetDescriptor,
};
use tokio_util::sync::CancellationToken;

use super::fixtures::{fleet, pool_config, CONNECT_DELAY};

// =============================================================================
// Bounded concurrency
// =============================================================================

/// Twelve sessions connected four at a time never exceed four connects in flight.
#[tokio::test(start_paused = true)]
async fn test_connect_all_respects_concurrency_limit() {
    let (pool, transports) = fleet(pool_config(50, 0), Arc::new(NoRetry)).unwrap();
    for i in 0..12 {
        pool.create_session(TargetDescriptor::new(format!("desk-{i:02}")))
            .unwrap();
    }

    let connected = pool.connect_all(4).await.unwrap();

    assert_eq!(connected, 12);
    assert_eq!(pool.connected_count(), 12);
    assert!(transports.probe.peak() <= 4, "peak was {}", transports.probe.peak());
    assert!(transports.probe.peak() > 1);
    assert_eq!(transports.probe.total(), 12);
    assert!(pool.metrics().peak_in_flight() <= 4);
}

/// Limit 0 means every session connects at once.
#[tokio::test(start_paused = true)]
async fn test_unlimited_concurrency_connects_everything_together() {
    let (pool, transports) = fleet(pool_config(10, 0), Arc::new(NoRetry)).unwrap();
    for i in 0..6 {
        pool.create_session(TargetDescriptor::new(format!("desk-{i}")))
            .unwrap();
    }

    let start = tokio::time::Instant::now();
    assert_eq!(pool.connect_all(0).await.unwrap(), 6);

    assert_eq!(transports.probe.peak(), 6);
    assert!(start.elapsed() < CONNECT_DELAY * 2);
}

// =============================================================================
// Capacity
// =============================================================================

#[tokio::test]
async fn test_capacity_exceeded_is_rejected() {
    let (pool, _) = fleet(pool_config(2, 0), Arc::new(NoRetry)).unwrap();
    pool.create_session(TargetDescriptor::new("a")).unwrap();
    pool.create_session(TargetDescriptor::new("b")).unwrap();

    let err = pool.create_session(TargetDescriptor::new("c")).unwrap_err();
    assert!(matches!(err, FleetError::CapacityExceeded { max: 2 }));
    assert_eq!(err.kind(), ErrorKind::CapacityExceeded);
    assert_eq!(pool.len(), 2);

    // Removing a session frees a slot
    let first = pool.ids()[0];
    assert!(pool.remove_session(first).await);
    assert!(pool.create_session(TargetDescriptor::new("c")).is_ok());
}

#[tokio::test]
async fn test_invalid_target_is_rejected() {
    let (pool, _) = fleet(pool_config(2, 0), Arc::new(NoRetry)).unwrap();
    let err = pool
        .create_session(TargetDescriptor::new("has space"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidConfiguration);
    assert!(pool.is_empty());
}

// =============================================================================
// Retry behavior
// =============================================================================

/// FixedDelay(3, 3000ms) retries three times, waiting three seconds before each.
#[tokio::test(start_paused = true)]
async fn test_fixed_delay_retries_then_errors() {
    let (pool, transports) = fleet(
        pool_config(5, 0),
        Arc::new(FixedDelay::new(3, Duration::from_millis(3000))),
    )
    .unwrap();
    let id = pool.create_session(TargetDescriptor::new("down-1")).unwrap();

    let start = tokio::time::Instant::now();
    assert_eq!(pool.connect_all(1).await.unwrap(), 0);
    let elapsed = start.elapsed();

    let info = pool.get(id).unwrap().info();
    assert_eq!(info.state, SessionState::Error);
    assert_eq!(info.stats.connect_attempts, 4);
    assert_eq!(info.stats.total_retries, 3);
    assert_eq!(transports.probe.total(), 4);
    assert!(elapsed >= Duration::from_secs(9), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(10), "elapsed {elapsed:?}");
    assert_eq!(
        info.stats.last_failure.map(|f| f.kind),
        Some(ErrorKind::RecoverableTransport)
    );
}

#[tokio::test(start_paused = true)]
async fn test_auth_failures_are_not_retried() {
    let (pool, _) = fleet(
        pool_config(5, 0),
        Arc::new(FixedDelay::new(3, Duration::from_secs(1))),
    )
    .unwrap();
    let id = pool.create_session(TargetDescriptor::new("denied-1")).unwrap();

    pool.connect_all(1).await.unwrap();

    let info = pool.get(id).unwrap().info();
    assert_eq!(info.state, SessionState::Error);
    assert_eq!(info.stats.connect_attempts, 1);
    assert_eq!(info.stats.total_retries, 0);
    assert_eq!(
        info.stats.last_failure.map(|f| f.kind),
        Some(ErrorKind::PermanentAuth)
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_failure_recovers_on_retry() {
    let (pool, _) = fleet(
        pool_config(5, 0),
        Arc::new(FixedDelay::new(3, Duration::from_secs(1))),
    )
    .unwrap();
    let id = pool.create_session(TargetDescriptor::new("flaky-1")).unwrap();

    assert_eq!(pool.connect_all(1).await.unwrap(), 1);

    let session = pool.get(id).unwrap();
    assert_eq!(session.state(), SessionState::Connected);
    assert_eq!(session.info().stats.total_retries, 1);
    // The per-connect retry counter resets on success
    assert_eq!(session.retry_count(), 0);
}

// =============================================================================
// Cleanup and teardown
// =============================================================================

/// Two sessions stuck in Error for 120s are reaped by a 60s grace; the connected one stays.
#[tokio::test(start_paused = true)]
async fn test_cleanup_inactive_removes_stale_error_sessions() {
    let (pool, _) = fleet(pool_config(10, 0), Arc::new(NoRetry)).unwrap();
    pool.create_session(TargetDescriptor::new("down-1")).unwrap();
    pool.create_session(TargetDescriptor::new("down-2")).unwrap();
    let healthy = pool.create_session(TargetDescriptor::new("desk-1")).unwrap();

    assert_eq!(pool.connect_all(0).await.unwrap(), 1);

    // Not stale yet
    assert_eq!(pool.cleanup_inactive(Duration::from_secs(60)).await.unwrap(), 0);

    tokio::time::advance(Duration::from_secs(120)).await;
    let removed = pool.cleanup_inactive(Duration::from_secs(60)).await.unwrap();

    assert_eq!(removed, 2);
    assert_eq!(pool.ids(), vec![healthy]);
    assert_eq!(pool.get(healthy).unwrap().state(), SessionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_connect_leaves_sessions_idle() {
    let (pool, transports) = fleet(pool_config(10, 2), Arc::new(NoRetry)).unwrap();
    for i in 0..4 {
        pool.create_session(TargetDescriptor::new(format!("desk-{i}")))
            .unwrap();
    }

    let cancel = CancellationToken::new();
    cancel.cancel();
    assert_eq!(pool.connect_all_with(2, &cancel).await.unwrap(), 0);

    assert_eq!(transports.probe.total(), 0);
    assert!(pool.infos().iter().all(|s| s.state == SessionState::Idle));
}

#[tokio::test(start_paused = true)]
async fn test_connect_subset_only_touches_named_sessions() {
    let (pool, _) = fleet(pool_config(10, 2), Arc::new(NoRetry)).unwrap();
    let a = pool.create_session(TargetDescriptor::new("desk-a")).unwrap();
    let b = pool.create_session(TargetDescriptor::new("desk-b")).unwrap();
    let c = pool.create_session(TargetDescriptor::new("desk-c")).unwrap();

    assert_eq!(pool.connect_subset(&[a, c]).await.unwrap(), 2);

    assert_eq!(pool.get(a).unwrap().state(), SessionState::Connected);
    assert_eq!(pool.get(b).unwrap().state(), SessionState::Idle);
    assert_eq!(pool.get(c).unwrap().state(), SessionState::Connected);
}

/// Naming a session several times connects it once and counts it once.
#[tokio::test(start_paused = true)]
async fn test_connect_subset_with_repeated_ids() {
    let (pool, transports) = fleet(pool_config(10, 0), Arc::new(NoRetry)).unwrap();
    let a = pool.create_session(TargetDescriptor::new("desk-a")).unwrap();

    assert_eq!(pool.connect_subset(&[a, a, a]).await.unwrap(), 1);
    assert_eq!(pool.connected_count(), 1);
    assert_eq!(transports.probe.total(), 1);
}

/// Connects and a disconnect racing on one session apply one after another.
#[tokio::test(start_paused = true)]
async fn test_overlapping_calls_on_one_session_stay_sequential() {
    let (pool, transports) = fleet(pool_config(10, 0), Arc::new(NoRetry)).unwrap();
    let (channel, mut events) = ChannelObserver::new(64);
    pool.attach(Arc::new(channel));
    let a = pool.create_session(TargetDescriptor::new("desk-a")).unwrap();

    let first_ids = [a];
    let (first, dropped, second) = tokio::join!(
        pool.connect_subset(&first_ids),
        async {
            tokio::time::sleep(CONNECT_DELAY / 5).await;
            pool.disconnect_all().await
        },
        async {
            tokio::time::sleep(CONNECT_DELAY / 2).await;
            pool.connect_subset(&[a]).await
        },
    );
    assert_eq!(first.unwrap(), 1);
    assert_eq!(dropped.unwrap(), 1);
    assert_eq!(second.unwrap(), 1);
    assert_eq!(transports.probe.peak(), 1);

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let FleetEvent::StateChanged { old, new, .. } = event {
            transitions.push((old, new));
        }
    }

    assert_eq!(transitions.first().map(|t| t.0), Some(SessionState::Idle));
    for pair in transitions.windows(2) {
        assert_eq!(pair[0].1, pair[1].0, "broken chain: {transitions:?}");
    }
    assert!(transitions.iter().all(|(old, new)| old.can_transition_to(*new)));
    assert_eq!(transitions.len(), 5);
    assert_eq!(pool.get(a).unwrap().state(), SessionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_all_then_dispose() {
    let (pool, _) = fleet(pool_config(10, 0), Arc::new(NoRetry)).unwrap();
    let a = pool.create_session(TargetDescriptor::new("desk-a")).unwrap();
    pool.create_session(TargetDescriptor::new("down-b")).unwrap();
    pool.connect_all(0).await.unwrap();

    assert_eq!(pool.disconnect_all().await.unwrap(), 1);
    let session = pool.get(a).unwrap();
    assert_eq!(session.state(), SessionState::Disconnected);

    pool.dispose().await;
    assert!(pool.is_disposed());
    assert!(pool.is_empty());
    assert_eq!(session.state(), SessionState::Disposed);
    assert!(matches!(
        pool.create_session(TargetDescriptor::new("late")),
        Err(FleetError::PoolDisposed)
    ));
    assert!(matches!(pool.connect_all(1).await, Err(FleetError::PoolDisposed)));

    // Dispose is idempotent
    pool.dispose().await;
}
