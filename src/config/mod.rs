// ABOUTME: Configuration management for session-fleet
// Loads layered TOML files into FleetConfig and provides serde helpers for durations

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::fleet::{
    ArtifactCacheConfig, BatcherConfig, HealthConfig, PoolConfig, RetryConfig, TargetDescriptor,
};

/// Everything the fleet binary reads from config files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// Capacity, concurrency and connect timeout
    pub pool: PoolConfig,

    /// Connect retry strategy
    pub retry: RetryConfig,

    /// Event log batching
    pub batcher: BatcherConfig,

    /// Liveness monitoring and inactive-session cleanup
    pub health: HealthConfig,

    /// Artifact cache sizing
    pub artifacts: ArtifactCacheConfig,

    /// Endpoints to manage
    pub targets: Vec<TargetDescriptor>,
}

impl FleetConfig {
    /// Load configuration from the default locations
    pub fn load() -> Result<Self> {
        Self::load_layered(&Self::get_config_paths())
    }

    /// Load a single explicit config file on top of the defaults
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            anyhow::bail!("Config file {} does not exist", path.display());
        }
        Self::load_layered(&[path.to_path_buf()])
    }

    /// Merge every existing file in `paths`, later files taking precedence
    ///
    /// Tables merge key by key; `targets` lists are concatenated.
    pub fn load_layered(paths: &[PathBuf]) -> Result<Self> {
        let mut merged = toml::Value::Table(toml::map::Map::new());

        for path in paths {
            if !path.exists() {
                continue;
            }
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            let layer: toml::Value = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {}", path.display()))?;
            tracing::debug!(path = %path.display(), "Loaded config layer");
            merge_values(&mut merged, layer);
        }

        Self::deserialize(merged).context("Failed to interpret merged configuration")
    }

    /// Check every section and target
    pub fn validate(&self) -> Result<()> {
        self.pool.validate().context("Invalid [pool] section")?;
        self.retry.build().context("Invalid [retry] section")?;
        self.batcher.validate().context("Invalid [batcher] section")?;
        self.health.validate().context("Invalid [health] section")?;
        self.artifacts
            .validate()
            .context("Invalid [artifacts] section")?;

        if self.targets.len() > self.pool.max_capacity {
            anyhow::bail!(
                "{} targets configured but pool max_capacity is {}",
                self.targets.len(),
                self.pool.max_capacity
            );
        }
        for (index, target) in self.targets.iter().enumerate() {
            target
                .validate()
                .with_context(|| format!("Invalid target #{} ({target})", index + 1))?;
        }
        Ok(())
    }

    /// Write the configuration as TOML
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(())
    }

    /// Configuration file paths, lowest precedence first
    pub fn get_config_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/session-fleet/config.toml")];

        if let Ok(config_dir) = Self::get_user_config_dir() {
            paths.push(config_dir.join("config.toml"));
        }

        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd.join(".session-fleet").join("config.toml"));
        }

        paths
    }

    /// User configuration directory (~/.session-fleet)
    pub fn get_user_config_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir().context("Failed to get home directory")?;
        Ok(home_dir.join(".session-fleet"))
    }
}

fn merge_values(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match (base.get_mut(&key), value) {
                    (Some(toml::Value::Array(existing)), toml::Value::Array(more))
                        if key == "targets" =>
                    {
                        existing.extend(more);
                    }
                    (Some(existing), value) => merge_values(existing, value),
                    (None, value) => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Serde helper for Duration as milliseconds (u64)
pub mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

/// Serde helper for Duration as seconds (u64)
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde helper for an optional Duration as seconds, with 0 meaning `None`
pub mod option_duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map_or(0, |d| d.as_secs()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok((secs > 0).then(|| Duration::from_secs(secs)))
    }
}
