//! Trigger loop configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Trigger loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// Sleep between polls that found nothing due.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum definitions dispatched per poll.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_batch_size() -> usize {
    100
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            batch_size: default_batch_size(),
        }
    }
}

impl TriggerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}
