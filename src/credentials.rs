// ABOUTME: Secret store capability used to resolve target credential references
// Backed by the system keychain (macOS Keychain, Linux Secret Service) or process memory

use std::collections::HashMap;

use keyring::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::fleet::{FleetError, FleetResult, TargetDescriptor};

const SERVICE_NAME: &str = "session-fleet";

/// Opaque handle to a stored secret
///
/// This is what a target's `credential_ref` holds; it never contains the plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SealedSecret(String);

impl SealedSecret {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SealedSecret {
    fn from(handle: &str) -> Self {
        Self(handle.to_string())
    }
}

impl std::fmt::Display for SealedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Seal and unseal secrets
pub trait SecretStore: Send + Sync {
    /// Store `plain` and return a handle to it
    fn encrypt(&self, plain: &str) -> FleetResult<SealedSecret>;

    /// Recover the plaintext behind a handle
    fn decrypt(&self, sealed: &SealedSecret) -> FleetResult<String>;

    /// Drop a stored secret; unknown handles are not an error
    fn forget(&self, sealed: &SealedSecret) -> FleetResult<()>;
}

/// Secrets kept in the system keychain, one entry per handle
#[derive(Debug, Clone)]
pub struct KeyringSecretStore {
    service: String,
}

impl Default for KeyringSecretStore {
    fn default() -> Self {
        Self::new(SERVICE_NAME)
    }
}

impl KeyringSecretStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, handle: &str) -> FleetResult<Entry> {
        Entry::new(&self.service, handle)
            .map_err(|e| FleetError::Secret(format!("Failed to create keyring entry: {e}")))
    }
}

impl SecretStore for KeyringSecretStore {
    fn encrypt(&self, plain: &str) -> FleetResult<SealedSecret> {
        let handle = Uuid::new_v4().to_string();
        self.entry(&handle)?
            .set_password(plain)
            .map_err(|e| FleetError::Secret(format!("Failed to store secret in keychain: {e}")))?;

        tracing::info!(handle = %handle, service = %self.service, "Stored secret");
        Ok(SealedSecret(handle))
    }

    fn decrypt(&self, sealed: &SealedSecret) -> FleetResult<String> {
        match self.entry(sealed.as_str())?.get_password() {
            Ok(password) => {
                tracing::debug!(handle = %sealed, "Retrieved secret");
                Ok(password)
            }
            Err(keyring::Error::NoEntry) => Err(FleetError::Secret(format!(
                "No secret stored for handle {sealed}"
            ))),
            Err(e) => {
                tracing::warn!(handle = %sealed, error = %e, "Failed to retrieve secret");
                Err(FleetError::Secret(format!("Failed to retrieve secret: {e}")))
            }
        }
    }

    fn forget(&self, sealed: &SealedSecret) -> FleetResult<()> {
        match self.entry(sealed.as_str())?.delete_credential() {
            Ok(()) => {
                tracing::info!(handle = %sealed, "Deleted secret");
                Ok(())
            }
            Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(FleetError::Secret(format!("Failed to delete secret: {e}"))),
        }
    }
}

/// Process-local store for tests and ephemeral fleets
#[derive(Debug, Default)]
pub struct MemorySecretStore {
    secrets: Mutex<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.secrets.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.lock().is_empty()
    }
}

impl SecretStore for MemorySecretStore {
    fn encrypt(&self, plain: &str) -> FleetResult<SealedSecret> {
        let handle = format!("mem-{}", Uuid::new_v4());
        self.secrets.lock().insert(handle.clone(), plain.to_string());
        Ok(SealedSecret(handle))
    }

    fn decrypt(&self, sealed: &SealedSecret) -> FleetResult<String> {
        self.secrets
            .lock()
            .get(sealed.as_str())
            .cloned()
            .ok_or_else(|| FleetError::Secret(format!("No secret stored for handle {sealed}")))
    }

    fn forget(&self, sealed: &SealedSecret) -> FleetResult<()> {
        self.secrets.lock().remove(sealed.as_str());
        Ok(())
    }
}

/// Plaintext credential for a target, if it carries a reference
pub fn resolve_credential(
    store: &dyn SecretStore,
    target: &TargetDescriptor,
) -> FleetResult<Option<String>> {
    target
        .credential_ref()
        .map(|handle| store.decrypt(&SealedSecret::from(handle)))
        .transpose()
}

/// Mask a secret for display, keeping a short prefix
pub fn masked(secret: &str) -> String {
    match secret.char_indices().nth(4) {
        Some((cut, _)) if secret.chars().count() > 12 => format!("{}••••••••", &secret[..cut]),
        _ => "••••••••".to_string(),
    }
}
