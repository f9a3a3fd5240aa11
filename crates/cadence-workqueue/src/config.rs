//! Queue, worker and retry configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lease and maintenance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Visibility timeout: how long a lease stays valid without renewal.
    #[serde(default = "default_lease_timeout")]
    pub lease_timeout_secs: u64,

    /// How often the reclaimer scans for expired leases.
    #[serde(default = "default_reclaim_interval")]
    pub reclaim_interval_secs: u64,

    /// How long terminal records are kept.
    #[serde(default = "default_history_retention")]
    pub history_retention_hours: u64,

    /// How often terminal records are pruned.
    #[serde(default = "default_prune_interval")]
    pub prune_interval_secs: u64,
}

fn default_lease_timeout() -> u64 {
    300
}

fn default_reclaim_interval() -> u64 {
    15
}

fn default_history_retention() -> u64 {
    168
}

fn default_prune_interval() -> u64 {
    3600
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            lease_timeout_secs: default_lease_timeout(),
            reclaim_interval_secs: default_reclaim_interval(),
            history_retention_hours: default_history_retention(),
            prune_interval_secs: default_prune_interval(),
        }
    }
}

impl QueueConfig {
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_secs)
    }

    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_secs(self.reclaim_interval_secs.max(1))
    }

    pub fn history_retention(&self) -> Duration {
        Duration::from_secs(self.history_retention_hours * 3600)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs.max(1))
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Workers per available processor.
    #[serde(default = "default_worker_multiplier")]
    pub worker_multiplier: u32,

    /// Fixed pool size. Overrides the multiplier when set.
    #[serde(default)]
    pub max_workers: Option<u32>,

    /// Queues consumed by every worker, in priority order.
    #[serde(default = "default_queues")]
    pub queues: Vec<String>,

    /// Upper bound on an idle worker's wait before it polls again.
    #[serde(default = "default_idle_poll")]
    pub idle_poll_ms: u64,

    /// How long in-flight executions may run after shutdown is requested.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,

    /// Per-execution time limit (none = unbounded).
    #[serde(default)]
    pub execution_timeout_secs: Option<u64>,
}

fn default_worker_multiplier() -> u32 {
    1
}

fn default_queues() -> Vec<String> {
    vec!["scheduler".to_string()]
}

fn default_idle_poll() -> u64 {
    1000
}

fn default_shutdown_grace() -> u64 {
    30
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            worker_multiplier: default_worker_multiplier(),
            max_workers: None,
            queues: default_queues(),
            idle_poll_ms: default_idle_poll(),
            shutdown_grace_secs: default_shutdown_grace(),
            execution_timeout_secs: None,
        }
    }
}

impl WorkerConfig {
    /// Number of worker slots for this machine.
    pub fn pool_size(&self) -> usize {
        if let Some(max) = self.max_workers {
            return (max as usize).max(1);
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cpus * self.worker_multiplier as usize).max(1)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout_secs.map(Duration::from_secs)
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per occurrence, first run included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff before the second attempt.
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,

    /// Backoff ceiling.
    #[serde(default = "default_backoff_max")]
    pub backoff_max_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base() -> u64 {
    5
}

fn default_backoff_max() -> u64 {
    600
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base(),
            backoff_max_secs: default_backoff_max(),
        }
    }
}
