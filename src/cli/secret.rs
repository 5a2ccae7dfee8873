// ABOUTME: CLI secret command - seal credentials into the keychain and forget them
//
// The printed handle goes into a target's credential_ref; the plaintext never touches the config.

use std::io::{self, Read};

use anyhow::{Context, Result};

use super::util::print_json;
use super::{OutputFormat, SecretAction, SecretArgs};
use session_fleet::credentials::{masked, KeyringSecretStore, SealedSecret, SecretStore};

/// Execute the secret command
#[allow(clippy::unused_async)] // Async for consistency with other CLI commands
pub async fn execute(args: SecretArgs, format: OutputFormat) -> Result<()> {
    let store = KeyringSecretStore::default();

    match args.action {
        SecretAction::Seal => {
            let sealed = seal_from(&store, io::stdin().lock())?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({ "credential_ref": sealed }))?,
                OutputFormat::Text => {
                    println!("Sealed secret. Add this to the target:");
                    println!("  credential_ref = \"{sealed}\"");
                }
            }
        }
        SecretAction::Forget { handle } => {
            store.forget(&SealedSecret::from(handle.as_str()))?;
            match format {
                OutputFormat::Json => print_json(&serde_json::json!({ "forgotten": handle }))?,
                OutputFormat::Text => println!("Forgot secret {handle}"),
            }
        }
    }
    Ok(())
}

/// Read one secret from `input`, dropping the trailing newline, and seal it
pub fn seal_from(store: &dyn SecretStore, mut input: impl Read) -> Result<SealedSecret> {
    let mut raw = String::new();
    input
        .read_to_string(&mut raw)
        .context("Failed to read secret from stdin")?;

    let secret = raw.trim_end_matches(['\r', '\n']);
    if secret.is_empty() {
        anyhow::bail!("Secret cannot be empty");
    }

    let sealed = store.encrypt(secret)?;
    tracing::info!(handle = %sealed, secret = %masked(secret), "Sealed secret");
    Ok(sealed)
}
