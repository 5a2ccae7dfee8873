// ABOUTME: CLI probe command - connect every configured target once and report fleet health
//
// Connects under the configured concurrency limit, runs a liveness broadcast, captures each
// transport's snapshot into the artifact cache, prints the result and disconnects.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use super::util::{build_pool, load_config, print_json, truncate};
use super::{OutputFormat, ProbeArgs};
use session_fleet::config::FleetConfig;
use session_fleet::fleet::{
    ArtifactCache, BatchOperator, HealthSnapshot, MetricsSnapshot, SessionContext, SessionId,
    SessionPool, SessionState, TransportError,
};

const SNAPSHOT_ARTIFACT: &str = "transport_snapshot";

/// One session as reported by probe
#[derive(Debug, Clone, Serialize)]
pub struct SessionRow {
    pub id: SessionId,
    pub name: String,
    pub state: SessionState,
    pub connect_attempts: u64,
    pub retries: u64,
    /// `None` when the session never connected
    pub alive: Option<bool>,
    pub last_error: Option<String>,
    pub transport: Option<serde_json::Value>,
}

/// Probe output
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub connected: usize,
    pub health: HealthSnapshot,
    pub metrics: MetricsSnapshot,
    pub sessions: Vec<SessionRow>,
}

impl ProbeReport {
    pub fn failed(&self) -> usize {
        self.sessions
            .iter()
            .filter(|s| s.state != SessionState::Connected || s.alive == Some(false))
            .count()
    }
}

/// Execute the probe command
pub async fn execute(
    args: ProbeArgs,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let config = load_config(config_path)?;
    let pool = build_pool(&config, args.port)?;
    let concurrency = args.concurrency.unwrap_or(config.pool.max_concurrency);

    let report = run_probe(&pool, &config, concurrency).await;

    if let Err(e) = pool.disconnect_all().await {
        tracing::warn!(error = %e, "Disconnect after probe failed");
    }
    pool.dispose().await;
    let report = report?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => output_text(&report),
    }

    let failed = report.failed();
    if args.strict && failed > 0 {
        anyhow::bail!("{failed} of {} target(s) failed", report.sessions.len());
    }
    Ok(())
}

/// Connect, check and snapshot every session in `pool`
pub async fn run_probe(
    pool: &Arc<SessionPool>,
    config: &FleetConfig,
    concurrency: usize,
) -> Result<ProbeReport> {
    let cache = ArtifactCache::new(&config.artifacts)?;
    let connected = pool.connect_all(concurrency).await?;
    tracing::info!(connected, total = pool.len(), "Probe connect finished");

    let operator = BatchOperator::new(Arc::clone(pool));
    let liveness = operator
        .broadcast(
            |ctx: SessionContext| async move {
                if ctx.transport.is_alive() {
                    Ok(())
                } else {
                    Err(TransportError::recoverable("peer closed the connection"))
                }
            },
            &[],
        )
        .await?;

    let captured = operator
        .capture_artifacts(
            SNAPSHOT_ARTIFACT,
            |ctx: SessionContext| async move {
                serde_json::to_vec(&ctx.transport.snapshot())
                    .map_err(|e| TransportError::new(format!("snapshot encoding failed: {e}")))
            },
            &[],
            &cache,
        )
        .await?;
    tracing::debug!(captured = captured.success_count(), "Captured transport snapshots");

    let mut infos = pool.infos();
    infos.sort_by_key(|info| info.id);
    let sessions = infos
        .into_iter()
        .map(|info| SessionRow {
            id: info.id,
            name: info.target.to_string(),
            state: info.state,
            connect_attempts: info.stats.connect_attempts,
            retries: info.stats.total_retries,
            alive: liveness.get(info.id).map(|o| o.is_success()),
            last_error: info.stats.last_failure.map(|f| f.message),
            transport: cache
                .get(info.id, SNAPSHOT_ARTIFACT)
                .and_then(|bytes| serde_json::from_slice(&bytes).ok()),
        })
        .collect();

    Ok(ProbeReport {
        connected,
        health: operator.health_snapshot(),
        metrics: pool.metrics().snapshot(),
        sessions,
    })
}

fn output_text(report: &ProbeReport) {
    if report.sessions.is_empty() {
        println!("No sessions.");
        return;
    }

    println!(
        "{:<5} {:<32} {:<13} {:<6} {:<8} LAST ERROR",
        "ID", "TARGET", "STATE", "ALIVE", "RETRIES"
    );
    println!("{}", "-".repeat(100));
    for row in &report.sessions {
        let alive = match row.alive {
            Some(true) => "yes",
            Some(false) => "no",
            None => "-",
        };
        println!(
            "{:<5} {:<32} {:<13} {:<6} {:<8} {}",
            row.id,
            truncate(&row.name, 32),
            row.state,
            alive,
            row.retries,
            row.last_error.as_deref().map_or_else(String::new, |e| truncate(e, 40))
        );
    }

    println!();
    println!("{}", format_health(&report.health));
}

/// One-line fleet summary, shared by probe and watch
pub fn format_health(health: &HealthSnapshot) -> String {
    let states: Vec<String> = health
        .by_state
        .iter()
        .map(|(state, count)| format!("{state}={count}"))
        .collect();
    format!(
        "Fleet {}: {}/{} connected ({}), {} retries over {} connect attempts",
        status_label(health),
        health.connected,
        health.total_sessions,
        states.join(" "),
        health.total_retries,
        health.total_connect_attempts
    )
}

fn status_label(health: &HealthSnapshot) -> &'static str {
    if health.status.is_healthy() {
        "healthy"
    } else if health.status.is_critical() {
        "critical"
    } else {
        "degraded"
    }
}
