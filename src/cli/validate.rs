// ABOUTME: CLI validate command - load the configuration, check it and list targets
//
// With --check-secrets every credential_ref is resolved against the keychain.

use std::path::Path;

use anyhow::Result;
use serde::Serialize;

use super::util::{load_config, print_json, truncate};
use super::{OutputFormat, ValidateArgs};
use session_fleet::config::FleetConfig;
use session_fleet::credentials::{resolve_credential, KeyringSecretStore, SecretStore};

/// One configured target as reported by validate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetRow {
    pub index: usize,
    pub name: String,
    pub address: String,
    pub principal: Option<String>,
    pub has_credential: bool,
    /// `None` when secrets were not checked
    pub credential_ok: Option<bool>,
}

/// Validate output
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub max_capacity: usize,
    pub max_concurrency: usize,
    pub targets: Vec<TargetRow>,
}

/// Execute the validate command
#[allow(clippy::unused_async)] // Async for consistency with other CLI commands
pub async fn execute(
    args: ValidateArgs,
    config_path: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let config = load_config(config_path)?;
    let store = args.check_secrets.then(KeyringSecretStore::default);
    let report = build_report(&config, store.as_ref().map(|s| s as &dyn SecretStore));

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => output_text(&report),
    }

    if !report.valid {
        anyhow::bail!("Some credential references could not be resolved");
    }
    Ok(())
}

/// Describe every target; credentials are resolved only when a store is given
pub fn build_report(config: &FleetConfig, store: Option<&dyn SecretStore>) -> ValidationReport {
    let targets: Vec<TargetRow> = config
        .targets
        .iter()
        .enumerate()
        .map(|(i, target)| {
            let credential_ok = store.map(|store| match resolve_credential(store, target) {
                Ok(_) => true,
                Err(e) => {
                    tracing::warn!(endpoint = %target, error = %e, "Credential did not resolve");
                    false
                }
            });
            TargetRow {
                index: i + 1,
                name: target.to_string(),
                address: target.address(),
                principal: target.principal().map(str::to_string),
                has_credential: target.credential_ref().is_some(),
                credential_ok,
            }
        })
        .collect();

    ValidationReport {
        valid: targets.iter().all(|t| t.credential_ok != Some(false)),
        max_capacity: config.pool.max_capacity,
        max_concurrency: config.pool.max_concurrency,
        targets,
    }
}

fn output_text(report: &ValidationReport) {
    println!(
        "Configuration OK: {} target(s), capacity {}, concurrency {}",
        report.targets.len(),
        report.max_capacity,
        report.max_concurrency
    );
    if report.targets.is_empty() {
        return;
    }

    println!();
    println!("{:<4} {:<24} {:<30} {:<12} CREDENTIAL", "#", "NAME", "ADDRESS", "PRINCIPAL");
    println!("{}", "-".repeat(84));
    for row in &report.targets {
        let credential = match (row.has_credential, row.credential_ok) {
            (false, _) => "-",
            (true, None) => "set",
            (true, Some(true)) => "ok",
            (true, Some(false)) => "MISSING",
        };
        println!(
            "{:<4} {:<24} {:<30} {:<12} {}",
            row.index,
            truncate(&row.name, 24),
            truncate(&row.address, 30),
            truncate(row.principal.as_deref().unwrap_or("-"), 12),
            credential
        );
    }
}
