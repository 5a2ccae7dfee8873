// ABOUTME: Behavioral tests for layered configuration files driving a working fleet

use std::fs;
use std::time::Duration;

use session_fleet::config::FleetConfig;
use session_fleet::fleet::{HealthMonitor, RetryConfig, SessionState};
use tempfile::TempDir;

use super::fixtures::fleet;

const SYSTEM_LAYER: &str = r#"
[pool]
max_capacity = 10
max_concurrency = 2
connect_timeout_ms = 2000

[retry]
strategy = "exponential"
max_attempts = 2
initial_delay_ms = 500
max_delay_ms = 1000

[health]
interval_secs = 5
cleanup_grace_secs = 0

[[targets]]
host = "desk-1"
port = 3389
"#;

const USER_LAYER: &str = r#"
[pool]
max_concurrency = 3

[[targets]]
host = "flaky-2"
principal = "ops"

[[targets]]
host = "down-3"
label = "broken kiosk"
"#;

fn write_layers(dir: &TempDir) -> Vec<std::path::PathBuf> {
    let system = dir.path().join("system.toml");
    let user = dir.path().join("user.toml");
    fs::write(&system, SYSTEM_LAYER).unwrap();
    fs::write(&user, USER_LAYER).unwrap();
    vec![system, dir.path().join("absent.toml"), user]
}

#[test]
fn test_layers_merge_sections_and_accumulate_targets() {
    let dir = TempDir::new().unwrap();
    let config = FleetConfig::load_layered(&write_layers(&dir)).unwrap();

    assert_eq!(config.pool.max_capacity, 10);
    assert_eq!(config.pool.max_concurrency, 3);
    assert_eq!(config.pool.connect_timeout, Duration::from_secs(2));
    assert!(matches!(
        config.retry,
        RetryConfig::Exponential { max_attempts: 2, .. }
    ));
    assert_eq!(config.health.interval, Duration::from_secs(5));
    assert_eq!(config.health.cleanup_grace, None);
    assert_eq!(config.targets.len(), 3);
    assert_eq!(config.targets[2].to_string(), "broken kiosk");
    config.validate().unwrap();
}

/// A config file is enough to build, connect and monitor a fleet.
#[tokio::test(start_paused = true)]
async fn test_config_drives_a_fleet() {
    let dir = TempDir::new().unwrap();
    let config = FleetConfig::load_layered(&write_layers(&dir)).unwrap();

    let (pool, transports) = fleet(config.pool.clone(), config.retry.build().unwrap()).unwrap();
    for target in &config.targets {
        pool.create_session(target.clone()).unwrap();
    }

    let connected = pool.connect_all(config.pool.max_concurrency).await.unwrap();
    assert_eq!(connected, 2);
    assert!(transports.probe.peak() <= 3);

    let snapshot = HealthMonitor::check_once(&pool);
    assert_eq!(snapshot.count(SessionState::Connected), 2);
    assert_eq!(snapshot.count(SessionState::Error), 1);
    // flaky-2 needed one retry; down-3 used both
    assert_eq!(snapshot.total_retries, 3);
}
