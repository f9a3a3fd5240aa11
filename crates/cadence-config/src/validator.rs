//! Configuration validation.

use std::collections::HashSet;
use std::fmt;

use cadence_scheduler::CronSchedule;

use crate::error::ConfigError;
use crate::schema::Config;

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Turn the first error, if any, into a [`ConfigError`].
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(ConfigError::InvalidValue {
                field: error.path,
                message: error.message,
            }),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_store(config, &mut result);
        Self::validate_scheduler(config, &mut result);
        Self::validate_queue(config, &mut result);
        Self::validate_worker(config, &mut result);
        Self::validate_retry(config, &mut result);
        Self::validate_logging(config, &mut result);
        Self::validate_jobs(config, &mut result);

        result
    }

    fn validate_store(config: &Config, result: &mut ValidationResult) {
        let valid_backends = ["sqlite", "memory"];
        if !valid_backends.contains(&config.store.backend.as_str()) {
            result.add_error(ValidationError::new(
                "store.backend",
                format!(
                    "Unknown store backend '{}', valid values: {:?}",
                    config.store.backend, valid_backends
                ),
            ));
        }

        if config.store.is_memory() && config.store.path.is_some() {
            result.add_warning(ValidationWarning::new(
                "store.path",
                "path is ignored by the memory backend",
            ));
        }
    }

    fn validate_scheduler(config: &Config, result: &mut ValidationResult) {
        if config.scheduler.poll_interval_ms == 0 {
            result.add_error(ValidationError::new(
                "scheduler.poll_interval_ms",
                "poll_interval_ms must be greater than 0",
            ));
        }
        if config.scheduler.batch_size == 0 {
            result.add_error(ValidationError::new(
                "scheduler.batch_size",
                "batch_size must be greater than 0",
            ));
        }
    }

    fn validate_queue(config: &Config, result: &mut ValidationResult) {
        let queue = &config.queue;
        if queue.lease_timeout_secs == 0 {
            result.add_error(ValidationError::new(
                "queue.lease_timeout_secs",
                "lease_timeout_secs must be greater than 0",
            ));
        } else if queue.reclaim_interval_secs > queue.lease_timeout_secs {
            result.add_warning(ValidationWarning::new(
                "queue.reclaim_interval_secs",
                "reclaim interval exceeds the lease timeout, expired leases may wait longer than one timeout",
            ));
        }

        if queue.history_retention_hours == 0 {
            result.add_warning(ValidationWarning::new(
                "queue.history_retention_hours",
                "finished executions are deleted at the next prune",
            ));
        }
    }

    fn validate_worker(config: &Config, result: &mut ValidationResult) {
        let worker = &config.worker;
        if worker.queues.is_empty() {
            result.add_error(ValidationError::new(
                "worker.queues",
                "at least one queue must be consumed",
            ));
        }
        if worker.queues.iter().any(|q| q.trim().is_empty()) {
            result.add_error(ValidationError::new(
                "worker.queues",
                "queue names cannot be empty",
            ));
        }

        match worker.max_workers {
            Some(0) => result.add_error(ValidationError::new(
                "worker.max_workers",
                "max_workers must be greater than 0",
            )),
            None if worker.worker_multiplier == 0 => result.add_error(ValidationError::new(
                "worker.worker_multiplier",
                "worker_multiplier must be greater than 0",
            )),
            _ => {}
        }

        if worker.execution_timeout_secs == Some(0) {
            result.add_error(ValidationError::new(
                "worker.execution_timeout_secs",
                "execution_timeout_secs must be greater than 0 when set",
            ));
        }
    }

    fn validate_retry(config: &Config, result: &mut ValidationResult) {
        let retry = &config.retry;
        if retry.max_attempts == 0 {
            result.add_error(ValidationError::new(
                "retry.max_attempts",
                "max_attempts must be at least 1",
            ));
        }
        if retry.backoff_base_secs > retry.backoff_max_secs {
            result.add_warning(ValidationWarning::new(
                "retry.backoff_base_secs",
                "backoff base exceeds backoff_max_secs, every retry waits backoff_max_secs",
            ));
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        if config.logging.level.trim().is_empty() {
            result.add_error(ValidationError::new(
                "logging.level",
                "level cannot be empty",
            ));
        }
    }

    fn validate_jobs(config: &Config, result: &mut ValidationResult) {
        let mut seen = HashSet::new();

        for (i, job) in config.jobs.iter().enumerate() {
            let path = format!("jobs[{}]", i);

            if job.id.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("{}.id", path),
                    "job id cannot be empty",
                ));
            } else if !seen.insert(job.id.as_str()) {
                result.add_error(ValidationError::new(
                    format!("{}.id", path),
                    format!("duplicate job id '{}'", job.id),
                ));
            }

            if let Err(e) = CronSchedule::parse(&job.schedule) {
                result.add_error(ValidationError::new(format!("{}.schedule", path), e.to_string()));
            }

            if job.payload_ref.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("{}.payload_ref", path),
                    "payload_ref cannot be empty",
                ));
            }

            if job.queue.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("{}.queue", path),
                    "queue cannot be empty",
                ));
            } else if !config.worker.queues.contains(&job.queue) {
                result.add_warning(ValidationWarning::new(
                    format!("{}.queue", path),
                    format!(
                        "queue '{}' is not consumed by this process's workers",
                        job.queue
                    ),
                ));
            }
        }

        if config.store.is_memory() && !config.jobs.is_empty() {
            result.add_warning(ValidationWarning::new(
                "store.backend",
                "job state and execution history are lost on restart with the memory backend",
            ));
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
