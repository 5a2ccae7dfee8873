// ABOUTME: CLI argument parsing and command routing for fleet
//
// Provides command-line interface for:
// - Checking a fleet configuration (validate)
// - Connecting every configured target once and reporting health (probe)
// - Keeping a fleet connected under the health monitor (watch)
// - Sealing and forgetting target credentials (secret)

pub mod probe;
pub mod secret;
pub mod util;
pub mod validate;
pub mod watch;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Manage fleets of long-lived remote sessions
#[derive(Parser)]
#[command(name = "fleet")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Config file to use instead of the default locations
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Also log to stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

/// Output format for commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate the configuration, then list its targets
    Validate(ValidateArgs),

    /// Connect every target once, report fleet health and disconnect
    Probe(ProbeArgs),

    /// Keep every target connected and stream fleet events until Ctrl-C
    Watch(WatchArgs),

    /// Manage sealed credentials in the system keychain
    Secret(SecretArgs),
}

/// Arguments for the validate command
#[derive(clap::Args)]
pub struct ValidateArgs {
    /// Also check that every credential reference resolves in the keychain
    #[arg(long)]
    pub check_secrets: bool,
}

/// Arguments for the probe command
#[derive(clap::Args)]
pub struct ProbeArgs {
    /// Port for targets that do not name one
    #[arg(long)]
    pub port: Option<u16>,

    /// Maximum simultaneous connects (overrides pool.max_concurrency)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Exit with an error when any target fails to connect
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for the watch command
#[derive(clap::Args)]
pub struct WatchArgs {
    /// Port for targets that do not name one
    #[arg(long)]
    pub port: Option<u16>,

    /// Seconds between health checks (overrides health.interval_secs)
    #[arg(long)]
    pub interval: Option<u64>,
}

/// Arguments for the secret command
#[derive(clap::Args)]
pub struct SecretArgs {
    #[command(subcommand)]
    pub action: SecretAction,
}

/// Secret subcommands
#[derive(Subcommand)]
pub enum SecretAction {
    /// Read a secret from stdin and print the handle to use as a credential_ref
    Seal,

    /// Delete a sealed secret
    Forget {
        /// Handle printed by `fleet secret seal`
        handle: String,
    },
}
