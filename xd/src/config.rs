//! Daemon configuration types and loading.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::TransferConfiguration;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Defaults for transfer requests; CLI flags override per run.
    pub transfer: TransferConfiguration,

    /// Log level, overridden by `--log-level`.
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Timing limits
    pub timeouts: TimeoutConfig,

    /// Storage configuration
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Deadline for one task run, milliseconds.
    #[serde(rename = "task-timeout-ms")]
    pub task_timeout_ms: u64,

    /// How long an idle worker waits before trying to stop, milliseconds.
    #[serde(rename = "worker-idle-timeout-ms")]
    pub worker_idle_timeout_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            task_timeout_ms: 10_000,
            worker_idle_timeout_ms: 2_000,
        }
    }
}

impl TimeoutConfig {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }

    pub fn worker_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_idle_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Where task history is persisted. Defaults to
    /// `<data-local-dir>/xferd/history.json`.
    #[serde(rename = "history-path")]
    pub history_path: Option<PathBuf>,
}

impl StorageConfig {
    pub fn history_path(&self) -> PathBuf {
        if let Some(path) = &self.history_path {
            return path.clone();
        }
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("xferd")
            .join("history.json")
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .xferd.yml
        let local_config = PathBuf::from(".xferd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/xferd/xferd.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("xferd").join("xferd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}
