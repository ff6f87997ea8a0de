//! Configuration loading and data folder resolution

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Engine tunables.
///
/// Startup order: compiled defaults, then TOML file values, then database
/// settings overrides (see `db::settings`). Per-world score thresholds come
/// from the content provider contract, not from here.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Inactivity retention window before a session expires (days)
    pub retention_days: i64,
    /// Idle period after which a world lease may be taken over (seconds)
    pub lease_idle_seconds: i64,
    /// Wall-clock ceiling for loading a world content bundle (milliseconds)
    pub load_ceiling_ms: u64,
    /// Bounded retry count for access code generation collisions
    pub code_retry_limit: u32,
    /// Total time budget for persistence commit retries (milliseconds)
    pub commit_retry_ceiling_ms: u64,
    /// Event bus buffer capacity
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retention_days: 30,
            lease_idle_seconds: 120,
            load_ceiling_ms: 3000,
            code_retry_limit: 16,
            commit_retry_ceiling_ms: 10_000,
            event_capacity: 256,
        }
    }
}

impl EngineConfig {
    pub fn load_ceiling(&self) -> Duration {
        Duration::from_millis(self.load_ceiling_ms)
    }

    pub fn retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.retention_days)
    }

    pub fn lease_idle(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_idle_seconds)
    }

    /// Load from a TOML file, falling back to defaults for absent keys
    pub fn from_toml_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.retention_days < 1 {
            return Err(Error::Config("retention_days must be >= 1".to_string()));
        }
        if self.lease_idle_seconds < 1 {
            return Err(Error::Config("lease_idle_seconds must be >= 1".to_string()));
        }
        if self.code_retry_limit == 0 {
            return Err(Error::Config("code_retry_limit must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// Resolve the data folder, priority order:
/// 1. Command-line argument (highest priority)
/// 2. `CQ_DATA_DIR` environment variable
/// 3. `data_dir` key in the platform config file
/// 4. OS-dependent compiled default
pub fn resolve_data_dir(cli_arg: Option<&str>) -> PathBuf {
    if let Some(path) = cli_arg {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var("CQ_DATA_DIR") {
        return PathBuf::from(path);
    }

    if let Some(config_path) = platform_config_file() {
        if let Ok(content) = std::fs::read_to_string(&config_path) {
            if let Ok(value) = toml::from_str::<toml::Value>(&content) {
                if let Some(dir) = value.get("data_dir").and_then(|v| v.as_str()) {
                    return PathBuf::from(dir);
                }
            }
        }
    }

    default_data_dir()
}

/// Platform config file (`~/.config/civicquest/config.toml` on Linux)
fn platform_config_file() -> Option<PathBuf> {
    let path = dirs::config_dir()?.join("civicquest").join("config.toml");
    if path.exists() {
        Some(path)
    } else {
        None
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("civicquest"))
        .unwrap_or_else(|| PathBuf::from("./civicquest_data"))
}

/// Database path inside the data folder
pub fn database_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("civicquest.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.retention_days, 30);
    }

    #[test]
    fn cli_argument_wins() {
        let dir = resolve_data_dir(Some("/tmp/cq-test"));
        assert_eq!(dir, PathBuf::from("/tmp/cq-test"));
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "retention_days = 7\n").unwrap();

        let config = EngineConfig::from_toml_file(&path).unwrap();
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.lease_idle_seconds, 120);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let config = EngineConfig {
            retention_days: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
