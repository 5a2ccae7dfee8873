// ABOUTME: CLI watch command - keep a fleet connected under the health monitor until Ctrl-C
//
// Text output renders each fleet event as a line; JSON output streams the batched event log.
// Sessions reported as disconnected by a health check are reconnected.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::probe::format_health;
use super::util::{build_pool, load_config};
use super::{OutputFormat, WatchArgs};
use session_fleet::fleet::{
    ChannelObserver, EventLogObserver, FleetEvent, FleetResult, HealthMonitor, LoggingObserver,
    SessionId, SessionPool, SessionState,
};

/// Execute the watch command
pub async fn execute(
    args: WatchArgs,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(secs) = args.interval {
        config.health.interval = Duration::from_secs(secs.max(1));
    }

    let pool = build_pool(&config, args.port)?;
    pool.attach(Arc::new(LoggingObserver));

    let (channel, mut events) = ChannelObserver::new(config.batcher.capacity);
    pool.attach(Arc::new(channel));

    let event_log = match format {
        OutputFormat::Json => {
            let log = Arc::new(EventLogObserver::new(config.batcher.clone(), |lines| {
                for line in lines {
                    println!("{line}");
                }
            })?);
            pool.attach(log.clone());
            Some(log)
        }
        OutputFormat::Text => None,
    };

    let cancel = CancellationToken::new();
    let signal = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
                cancel.cancel();
            }
        })
    };

    let connected = pool
        .connect_all_with(config.pool.max_concurrency, &cancel)
        .await?;
    info!(connected, total = pool.len(), "Initial connect finished");

    let mut monitor = HealthMonitor::from_config(&config.health);
    monitor.start(Arc::clone(&pool));

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                if format == OutputFormat::Text {
                    println!("{}", render_event(&event));
                }
                if matches!(event, FleetEvent::Health { .. }) {
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        result = reconnect_dropped(&pool) => {
                            if let Err(e) = result {
                                warn!(error = %e, "Reconnect skipped");
                            }
                        }
                    }
                }
            }
        }
    }

    monitor.stop().await;
    if let Err(e) = pool.disconnect_all().await {
        warn!(error = %e, "Disconnect on shutdown failed");
    }
    pool.dispose().await;
    if let Some(log) = event_log {
        log.complete().await;
    }
    signal.abort();
    Ok(())
}

/// Reconnect every `Disconnected` session; returns how many came back
///
/// Runs whatever the overall status is, so one failed target does not keep
/// dropped sessions offline.
pub async fn reconnect_dropped(pool: &SessionPool) -> FleetResult<usize> {
    let dropped: Vec<SessionId> = pool
        .infos()
        .into_iter()
        .filter(|info| info.state == SessionState::Disconnected)
        .map(|info| info.id)
        .collect();
    if dropped.is_empty() {
        return Ok(0);
    }
    info!(count = dropped.len(), "Reconnecting dropped sessions");
    pool.connect_subset(&dropped).await
}

/// Human-readable form of one fleet event
pub fn render_event(event: &FleetEvent) -> String {
    match event {
        FleetEvent::StateChanged {
            session_id,
            target,
            old,
            new,
            at,
        } => format!(
            "[{}] session {session_id} ({target}): {old} -> {new}",
            at.format("%H:%M:%S")
        ),
        FleetEvent::Timeout {
            session_id,
            target,
            details,
            at,
        } => format!(
            "[{}] session {session_id} ({target}) timed out: {details}",
            at.format("%H:%M:%S")
        ),
        FleetEvent::OperationFailed { failure, at } => {
            let subject = failure
                .session_id
                .map_or_else(|| "fleet".to_string(), |id| format!("session {id}"));
            format!(
                "[{}] {subject}: {} failed ({}): {}",
                at.format("%H:%M:%S"),
                failure.operation,
                failure.kind,
                failure.message
            )
        }
        FleetEvent::Health { snapshot } => format!(
            "[{}] {}",
            snapshot.taken_at.format("%H:%M:%S"),
            format_health(snapshot)
        ),
    }
}
