// ABOUTME: Main entry point for the fleet CLI
//
// Binary: fleet
// Usage: fleet [--config FILE] [--format text|json] [--verbose] <COMMAND>
// - validate: load and check the configuration, list targets
// - probe: connect every target once and report fleet health
// - watch: keep the fleet connected and stream events until Ctrl-C
// - secret: seal or forget target credentials

#![allow(missing_docs)]

use anyhow::Result;
use clap::Parser;

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    setup_logging(args.verbose);
    setup_panic_handler();

    let config_path = args.config.as_deref();
    let result = match args.command {
        cli::Commands::Validate(validate_args) => {
            cli::validate::execute(validate_args, config_path, args.format).await
        }
        cli::Commands::Probe(probe_args) => {
            cli::probe::execute(probe_args, config_path, args.format).await
        }
        cli::Commands::Watch(watch_args) => {
            cli::watch::execute(watch_args, config_path, args.format).await
        }
        cli::Commands::Secret(secret_args) => cli::secret::execute(secret_args, args.format).await,
    };

    if let Err(e) = &result {
        tracing::error!(error = %format!("{e:#}"), "Command failed");
    }
    result
}

fn setup_logging(verbose: bool) {
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use tracing_subscriber::prelude::*;

    // Create log directory if it doesn't exist
    let log_dir = session_fleet::config::FleetConfig::get_user_config_dir()
        .map(|dir| dir.join("logs"))
        .unwrap_or_else(|_| PathBuf::from(".session-fleet/logs"));

    let _ = std::fs::create_dir_all(&log_dir);

    // Create JSONL log file with timestamp
    let log_file = log_dir.join(format!(
        "session-fleet-{}.jsonl",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ));

    // A missing log file only loses the file layer
    let file_layer = match OpenOptions::new().create(true).append(true).open(&log_file) {
        Ok(file) => Some(
            tracing_subscriber::fmt::layer()
                .json() // Output in JSON Lines format
                .with_target(true) // Include target module in JSON
                .with_writer(file)
                .with_ansi(false),
        ),
        Err(e) => {
            eprintln!("Could not open log file {}: {e}", log_file.display());
            None
        }
    };

    let stderr_layer = verbose.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "session_fleet=info,fleet=info".into()),
        )
        .init();
}

fn setup_panic_handler() {
    use tracing::error;

    std::panic::set_hook(Box::new(|panic_info| {
        error!("Application panicked: {}", panic_info);
        eprintln!("Application panicked: {}", panic_info);
        eprintln!("Please check the logs for more details.");
    }));
}
