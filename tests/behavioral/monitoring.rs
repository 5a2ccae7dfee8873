// ABOUTME: Behavioral tests for observers, the health monitor, event batching and object pooling

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use session_fleet::fleet::{
    BatcherConfig, ChannelObserver, EventLogObserver, FleetEvent, HealthMonitor, MicroBatcher,
    NoRetry, ResourcePool, SessionState, StatsObserver, TargetDescriptor,
};

use super::fixtures::{fleet, pool_config};

#[tokio::test(start_paused = true)]
async fn test_channel_observer_streams_transitions_in_order() {
    let (pool, _) = fleet(pool_config(5, 0), Arc::new(NoRetry)).unwrap();
    let (channel, mut events) = ChannelObserver::new(16);
    pool.attach(Arc::new(channel));
    let id = pool.create_session(TargetDescriptor::new("desk-1")).unwrap();

    pool.connect_all(1).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let FleetEvent::StateChanged {
            session_id, old, new, ..
        } = event
        {
            assert_eq!(session_id, id);
            seen.push((old, new));
        }
    }
    assert_eq!(
        seen,
        vec![
            (SessionState::Idle, SessionState::Connecting),
            (SessionState::Connecting, SessionState::Connected),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_detached_observer_stops_receiving() {
    let (pool, _) = fleet(pool_config(5, 0), Arc::new(NoRetry)).unwrap();
    let stats = Arc::new(StatsObserver::new());
    let observer: Arc<dyn session_fleet::fleet::SessionObserver> = stats.clone();
    assert!(pool.attach(Arc::clone(&observer)));
    assert!(!pool.attach(Arc::clone(&observer)));

    pool.create_session(TargetDescriptor::new("desk-1")).unwrap();
    pool.connect_all(1).await.unwrap();
    assert_eq!(stats.entered(SessionState::Connected), 1);

    assert!(pool.detach(&observer));
    pool.disconnect_all().await.unwrap();
    assert_eq!(stats.entered(SessionState::Disconnected), 0);
}

/// The monitor notices a dead transport, then reaps both inactive sessions once past grace.
#[tokio::test(start_paused = true)]
async fn test_health_monitor_detects_drops_and_reaps() {
    let (pool, transports) = fleet(pool_config(5, 0), Arc::new(NoRetry)).unwrap();
    let pool = Arc::new(pool);
    let stats = Arc::new(StatsObserver::new());
    pool.attach(stats.clone());

    let desk = pool.create_session(TargetDescriptor::new("desk-1")).unwrap();
    pool.create_session(TargetDescriptor::new("down-2")).unwrap();
    pool.connect_all(0).await.unwrap();

    let mut monitor =
        HealthMonitor::new(Duration::from_secs(10)).with_cleanup(Duration::from_secs(60), 2);
    monitor.start(Arc::clone(&pool));
    assert!(monitor.is_running());

    transports.get("desk-1").unwrap().drop_connection();
    tokio::time::sleep(Duration::from_secs(11)).await;

    assert_eq!(pool.get(desk).unwrap().state(), SessionState::Disconnected);
    assert!(stats.health_reports() >= 1);
    assert_eq!(pool.len(), 2);

    tokio::time::sleep(Duration::from_secs(75)).await;
    assert!(pool.is_empty());

    monitor.stop().await;
    assert!(!monitor.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_health_monitor_exits_when_pool_is_disposed() {
    let (pool, _) = fleet(pool_config(5, 0), Arc::new(NoRetry)).unwrap();
    let pool = Arc::new(pool);
    let mut monitor = HealthMonitor::new(Duration::from_secs(10));
    monitor.start(Arc::clone(&pool));

    pool.dispose().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!monitor.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_event_log_receives_every_transition() {
    let (pool, _) = fleet(pool_config(5, 0), Arc::new(NoRetry)).unwrap();
    let batches: Arc<Mutex<Vec<Vec<String>>>> = Arc::default();
    let sink = Arc::clone(&batches);
    let log = Arc::new(
        EventLogObserver::new(
            BatcherConfig {
                batch_size: 10,
                batch_timeout: Duration::from_millis(100),
                capacity: 64,
            },
            move |lines| sink.lock().push(lines),
        )
        .unwrap(),
    );
    pool.attach(log.clone());

    pool.create_session(TargetDescriptor::new("desk-1")).unwrap();
    pool.create_session(TargetDescriptor::new("desk-2")).unwrap();
    pool.connect_all(0).await.unwrap();
    log.complete().await;

    let lines: Vec<String> = batches.lock().iter().flatten().cloned().collect();
    assert_eq!(lines.len(), 4);
    for line in &lines {
        let event: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(event["event"], "state_changed");
    }
    assert_eq!(log.dropped(), 0);
}

/// Three items with batch size 10 and a 100ms timeout arrive as one batch of three.
#[tokio::test(start_paused = true)]
async fn test_micro_batcher_flushes_partial_batch_on_timeout() {
    let batches: Arc<Mutex<Vec<Vec<u32>>>> = Arc::default();
    let sink = Arc::clone(&batches);
    let batcher = MicroBatcher::new(
        BatcherConfig {
            batch_size: 10,
            batch_timeout: Duration::from_millis(100),
            capacity: 32,
        },
        move |items: Vec<u32>| {
            sink.lock().push(items);
            async { Ok(()) }
        },
    )
    .unwrap();

    for i in 0..3 {
        batcher.enqueue(i).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(*batches.lock(), vec![vec![0, 1, 2]]);
    batcher.complete().await;
    assert!(batcher.enqueue(9).await.is_err());
}

#[test]
fn test_resource_pool_keeps_at_most_max_size() {
    let pool = ResourcePool::new(3, || Vec::<u8>::with_capacity(16));
    let rented: Vec<Vec<u8>> = (0..5).map(|_| pool.rent()).collect();
    for item in rented {
        pool.release(item);
    }

    assert_eq!(pool.len(), 3);
    let stats = pool.stats();
    assert_eq!(stats.created, 5);
    assert_eq!(stats.returned, 3);
    assert_eq!(stats.discarded, 2);
}
