//! Execution runner: resolves the handler for a leased record, runs it under
//! a cancellation token, keeps the lease alive and reports the raw outcome.
//!
//! The runner never retries. Turning an outcome into a queue transition is
//! the worker's job, guided by the [`FailurePolicy`](crate::policy::FailurePolicy).

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::execution::LeasedExecution;
use crate::policy::ExecutionFailure;
use crate::queue::WorkQueue;

/// Everything a job body learns about the occurrence it runs for.
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    pub execution_id: Uuid,
    pub attempt: u32,
    pub fire_time: DateTime<Utc>,
    pub payload_ref: String,
    /// Cancelled when the runner gives up on the execution (timeout, lost
    /// lease or forced shutdown). Handlers should stop promptly.
    pub cancel: CancellationToken,
}

/// Job body.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, ctx: JobContext) -> Result<(), ExecutionFailure>;
}

/// Maps payload references to handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `payload_ref`, replacing any previous one.
    pub fn register(&self, payload_ref: impl Into<String>, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(payload_ref.into(), handler);
    }

    pub fn get(&self, payload_ref: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(payload_ref).map(|h| h.value().clone())
    }

    pub fn contains(&self, payload_ref: &str) -> bool {
        self.handlers.contains_key(payload_ref)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered payload references, sorted.
    pub fn payload_refs(&self) -> Vec<String> {
        let mut refs: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        refs.sort();
        refs
    }
}

/// Raw result of one run.
#[derive(Debug)]
pub enum RunOutcome {
    Succeeded,
    Failed(ExecutionFailure),
    /// The lease was taken away; the record belongs to someone else now.
    LeaseLost(String),
    /// Forced shutdown; the lease is left to expire.
    Interrupted,
}

/// Runs leased executions.
pub struct ExecutionRunner {
    queue: Arc<WorkQueue>,
    handlers: Arc<HandlerRegistry>,
    lease_duration: Duration,
    execution_timeout: Option<Duration>,
}

impl ExecutionRunner {
    pub fn new(
        queue: Arc<WorkQueue>,
        handlers: Arc<HandlerRegistry>,
        lease_duration: Duration,
        execution_timeout: Option<Duration>,
    ) -> Self {
        Self {
            queue,
            handlers,
            lease_duration,
            execution_timeout,
        }
    }

    /// Lease duration used both for leasing and for each renewal.
    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Run `leased` to completion, timeout, lease loss or `hard_stop`.
    pub async fn run(&self, leased: &LeasedExecution, hard_stop: &CancellationToken) -> RunOutcome {
        let record = &leased.record;
        let token = leased.lease.token;

        let Some(handler) = self.handlers.get(&record.payload_ref) else {
            return RunOutcome::Failed(ExecutionFailure::permanent(format!(
                "no handler registered for '{}'",
                record.payload_ref
            )));
        };

        if let Err(e) = self.queue.start(token).await {
            return RunOutcome::LeaseLost(e.to_string());
        }

        let cancel = CancellationToken::new();
        let ctx = JobContext {
            job_id: record.job_id.clone(),
            execution_id: record.id,
            attempt: record.attempt,
            fire_time: record.fire_time,
            payload_ref: record.payload_ref.clone(),
            cancel: cancel.clone(),
        };

        debug!(
            execution_id = %record.id,
            job_id = %record.job_id,
            attempt = record.attempt,
            "Running job"
        );
        let mut task = tokio::spawn(async move { handler.run(ctx).await });

        let renew_every = (self.lease_duration / 3).max(Duration::from_millis(10));
        let mut renew = tokio::time::interval_at(Instant::now() + renew_every, renew_every);
        renew.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let limit = self.execution_timeout;
        let deadline = async move {
            match limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                biased;

                joined = &mut task => {
                    return match joined {
                        Ok(Ok(())) => RunOutcome::Succeeded,
                        Ok(Err(failure)) => RunOutcome::Failed(failure),
                        Err(e) if e.is_panic() => RunOutcome::Failed(ExecutionFailure::permanent(
                            format!("handler panicked: {}", panic_message(e.into_panic())),
                        )),
                        Err(e) => RunOutcome::Failed(ExecutionFailure::transient(format!(
                            "handler task cancelled: {e}"
                        ))),
                    };
                }
                _ = hard_stop.cancelled() => {
                    cancel.cancel();
                    task.abort();
                    return RunOutcome::Interrupted;
                }
                _ = &mut deadline => {
                    cancel.cancel();
                    task.abort();
                    return RunOutcome::Failed(ExecutionFailure::transient(format!(
                        "execution timed out after {:?}",
                        limit.unwrap_or_default()
                    )));
                }
                _ = renew.tick() => {
                    match self.queue.renew(token, self.lease_duration).await {
                        Ok(lease) => debug!(
                            execution_id = %record.id,
                            expires_at = %lease.expires_at,
                            "Renewed lease"
                        ),
                        Err(e @ QueueError::LeaseConflict { .. }) => {
                            warn!(execution_id = %record.id, "Lease lost while running: {}", e);
                            cancel.cancel();
                            task.abort();
                            return RunOutcome::LeaseLost(e.to_string());
                        }
                        Err(e) => warn!(execution_id = %record.id, "Lease renewal failed: {}", e),
                    }
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
