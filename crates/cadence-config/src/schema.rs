//! Configuration schema definitions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub use cadence_scheduler::TriggerConfig;
pub use cadence_workqueue::{QueueConfig, RetryConfig, WorkerConfig};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub scheduler: TriggerConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Jobs registered at startup.
    #[serde(default)]
    pub jobs: Vec<JobEntry>,
}

/// Cadence home directory (`~/.cadence`).
pub fn cadence_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".cadence")
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

/// Persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store backend ("sqlite" or "memory").
    #[serde(default = "default_backend")]
    pub backend: String,

    /// SQLite database file. Defaults to `~/.cadence/cadence.db`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

fn default_backend() -> String {
    "sqlite".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: None,
        }
    }
}

impl StoreConfig {
    pub fn is_memory(&self) -> bool {
        self.backend == "memory"
    }

    /// Database file with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        match &self.path {
            Some(path) => expand(path),
            None => cadence_dir().join("cadence.db"),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is not set.
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines on the console instead of text.
    #[serde(default)]
    pub json: bool,

    /// Directory for daily-rotated log files. No file output when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,

    /// Rotated files kept.
    #[serde(default = "default_max_log_files")]
    pub max_log_files: usize,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    30
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            json: false,
            directory: None,
            max_log_files: default_max_log_files(),
        }
    }
}

impl LoggingConfig {
    /// Log directory with `~` expanded.
    pub fn directory(&self) -> Option<PathBuf> {
        self.directory.as_deref().map(expand)
    }
}

/// A job registered when the service starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEntry {
    /// Unique job ID.
    pub id: String,

    /// Five-field cron expression (UTC).
    pub schedule: String,

    /// Target queue.
    #[serde(default = "default_queue")]
    pub queue: String,

    /// Handler the job runs.
    pub payload_ref: String,

    /// Paused jobs stay registered but never fire.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_queue() -> String {
    "scheduler".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
