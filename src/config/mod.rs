//! Configuration management for the tributary connector manager
//!
//! This module handles loading and validating configuration from environment variables
//! and TOML files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Manager tick intervals and backoff
    pub manager: ManagerConfig,

    /// Task executor configuration
    pub executor: ExecutorConfig,

    /// Load manager configuration
    pub load: LoadConfig,

    /// Instance store configuration
    pub store: StoreConfig,

    /// Connector type manifest
    pub plugins: Vec<PluginConfig>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Manager tick configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Seconds between `start_batch` sweeps over all connectors
    pub traversal_interval_secs: u64,

    /// Seconds between change detection passes
    pub change_detect_interval_secs: u64,

    /// Seconds to hold a connector back after a failed batch
    pub error_backoff_secs: u64,
}

/// Task executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum number of batches running at once
    pub max_workers: usize,

    /// Maximum lifetime of one batch in seconds
    pub task_timeout_secs: u64,

    /// Seconds to wait for running batches on shutdown
    pub shutdown_wait_secs: u64,
}

/// Load manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Upper bound on documents requested per batch
    pub batch_hint: u64,

    /// Length of the throughput accounting period in seconds
    pub period_secs: u64,
}

/// Store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Memory,
}

/// Instance store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,

    /// SQLite database path
    pub sqlite_path: PathBuf,
}

/// One `[[plugins]]` manifest entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Connector type name
    pub type_name: String,

    /// Whether instances of this type may be created
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let traversal_interval_secs = env_parse("TRIBUTARY_TRAVERSAL_INTERVAL")
            .unwrap_or(defaults.manager.traversal_interval_secs);

        let change_detect_interval_secs = env_parse("TRIBUTARY_CHANGE_DETECT_INTERVAL")
            .unwrap_or(defaults.manager.change_detect_interval_secs);

        let error_backoff_secs =
            env_parse("TRIBUTARY_ERROR_BACKOFF").unwrap_or(defaults.manager.error_backoff_secs);

        let max_workers =
            env_parse("TRIBUTARY_MAX_WORKERS").unwrap_or(defaults.executor.max_workers);

        let task_timeout_secs =
            env_parse("TRIBUTARY_TASK_TIMEOUT").unwrap_or(defaults.executor.task_timeout_secs);

        let shutdown_wait_secs =
            env_parse("TRIBUTARY_SHUTDOWN_WAIT").unwrap_or(defaults.executor.shutdown_wait_secs);

        let batch_hint = env_parse("TRIBUTARY_BATCH_HINT").unwrap_or(defaults.load.batch_hint);

        let period_secs = env_parse("TRIBUTARY_LOAD_PERIOD").unwrap_or(defaults.load.period_secs);

        let backend = match std::env::var("TRIBUTARY_STORE_BACKEND") {
            Ok(value) => match value.to_lowercase().as_str() {
                "sqlite" => StoreBackend::Sqlite,
                "memory" => StoreBackend::Memory,
                other => anyhow::bail!("Unknown store backend '{other}'"),
            },
            Err(_) => defaults.store.backend,
        };

        let sqlite_path = std::env::var("TRIBUTARY_SQLITE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.store.sqlite_path);

        let level =
            std::env::var("TRIBUTARY_LOG_LEVEL").unwrap_or_else(|_| String::from("info"));

        let format =
            std::env::var("TRIBUTARY_LOG_FORMAT").unwrap_or_else(|_| String::from("text"));

        Ok(Self {
            manager: ManagerConfig {
                traversal_interval_secs,
                change_detect_interval_secs,
                error_backoff_secs,
            },
            executor: ExecutorConfig {
                max_workers,
                task_timeout_secs,
                shutdown_wait_secs,
            },
            load: LoadConfig {
                batch_hint,
                period_secs,
            },
            store: StoreConfig {
                backend,
                sqlite_path,
            },
            plugins: Vec::new(),
            logging: LoggingConfig { level, format },
        })
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.manager.traversal_interval_secs == 0 {
            anyhow::bail!("traversal_interval_secs must be greater than 0");
        }

        if self.manager.change_detect_interval_secs == 0 {
            anyhow::bail!("change_detect_interval_secs must be greater than 0");
        }

        if self.executor.max_workers == 0 {
            anyhow::bail!("max_workers must be greater than 0");
        }

        if self.executor.task_timeout_secs == 0 {
            anyhow::bail!("task_timeout_secs must be greater than 0");
        }

        if self.load.batch_hint == 0 {
            anyhow::bail!("batch_hint must be greater than 0");
        }

        if self.load.period_secs == 0 {
            anyhow::bail!("period_secs must be greater than 0");
        }

        let mut seen = std::collections::HashSet::new();
        for plugin in &self.plugins {
            if plugin.type_name.trim().is_empty() {
                anyhow::bail!("plugin type_name must not be empty");
            }
            if !seen.insert(plugin.type_name.as_str()) {
                anyhow::bail!("plugin '{}' listed more than once", plugin.type_name);
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn traversal_interval(&self) -> Duration {
        Duration::from_secs(self.manager.traversal_interval_secs)
    }

    #[must_use]
    pub fn change_detect_interval(&self) -> Duration {
        Duration::from_secs(self.manager.change_detect_interval_secs)
    }

    #[must_use]
    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.manager.error_backoff_secs)
    }

    #[must_use]
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.executor.task_timeout_secs)
    }

    #[must_use]
    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_secs(self.executor.shutdown_wait_secs)
    }

    #[must_use]
    pub fn load_period(&self) -> Duration {
        Duration::from_secs(self.load.period_secs)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            traversal_interval_secs: 5,
            change_detect_interval_secs: 10,
            error_backoff_secs: 300,
        }
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            task_timeout_secs: 1800,
            shutdown_wait_secs: 10,
        }
    }
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            batch_hint: 500,
            period_secs: 60,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            sqlite_path: PathBuf::from("data/tributary.db"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}
