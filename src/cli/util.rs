// ABOUTME: Shared CLI utilities for config loading, pool construction and output
//
// Every command goes through the same load-then-validate path so errors read the same.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use session_fleet::config::FleetConfig;
use session_fleet::fleet::{SessionPool, TcpTransport};

/// Load the explicit config file, or the layered defaults, and validate it
pub fn load_config(path: Option<&Path>) -> Result<FleetConfig> {
    let config = match path {
        Some(path) => FleetConfig::load_from_path(path)?,
        None => FleetConfig::load()?,
    };
    config.validate()?;
    tracing::debug!(targets = config.targets.len(), "Configuration loaded");
    Ok(config)
}

/// A TCP-backed pool with one idle session per configured target
pub fn build_pool(config: &FleetConfig, default_port: Option<u16>) -> Result<Arc<SessionPool>> {
    if config.targets.is_empty() {
        anyhow::bail!("No targets configured. Add [[targets]] entries to your config file.");
    }

    let pool = SessionPool::from_config(
        &config.pool,
        &config.retry,
        TcpTransport::factory(default_port),
    )
    .context("Failed to build session pool")?;

    for target in &config.targets {
        pool.create_session(target.clone())
            .with_context(|| format!("Failed to create session for {target}"))?;
    }
    Ok(Arc::new(pool))
}

/// Pretty-print any serializable value as JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

/// Truncate a string to fit in the given width (character-aware for UTF-8)
pub fn truncate(s: &str, max_len: usize) -> String {
    if max_len <= 3 {
        return ".".repeat(max_len);
    }
    let char_count = s.chars().count();
    if char_count <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{truncated}...")
    }
}
