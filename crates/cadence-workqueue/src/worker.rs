//! Worker pool for execution processing.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::QueueError;
use crate::execution::{Completion, ExecutionRecord, LeasedExecution};
use crate::policy::{Decision, ExecutionFailure, FailurePolicy};
use crate::queue::WorkQueue;
use crate::runner::{ExecutionRunner, RunOutcome};

/// A single worker slot.
pub struct Worker {
    id: usize,
    name: String,
    running: AtomicBool,
    executions_completed: AtomicU64,
    executions_failed: AtomicU64,
}

impl Worker {
    /// Create a new worker.
    pub fn new(id: usize, pool: &str) -> Self {
        Self {
            id,
            name: format!("{pool}-worker-{id}"),
            running: AtomicBool::new(false),
            executions_completed: AtomicU64::new(0),
            executions_failed: AtomicU64::new(0),
        }
    }

    /// Get worker ID.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Lease owner name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if worker is running an execution.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get succeeded execution count.
    pub fn executions_completed(&self) -> u64 {
        self.executions_completed.load(Ordering::SeqCst)
    }

    /// Get failed attempt count.
    pub fn executions_failed(&self) -> u64 {
        self.executions_failed.load(Ordering::SeqCst)
    }

    /// Run a leased execution and settle its outcome.
    pub async fn process(
        &self,
        leased: LeasedExecution,
        runner: &ExecutionRunner,
        queue: &WorkQueue,
        policy: &FailurePolicy,
        hard_stop: &CancellationToken,
    ) -> Result<(), QueueError> {
        self.running.store(true, Ordering::SeqCst);
        debug!("Worker {} processing execution {}", self.name, leased.record.id);

        let token = leased.lease.token;
        let result = match runner.run(&leased, hard_stop).await {
            RunOutcome::Succeeded => queue
                .complete(token, Completion::Succeeded)
                .await
                .map(|_| {
                    self.executions_completed.fetch_add(1, Ordering::SeqCst);
                }),
            RunOutcome::Failed(failure) => {
                self.executions_failed.fetch_add(1, Ordering::SeqCst);
                settle_failure(queue, policy, &leased.record, token, &failure).await
            }
            RunOutcome::LeaseLost(reason) => {
                warn!(
                    "Worker {} lost lease on execution {}: {}",
                    self.name, leased.record.id, reason
                );
                Ok(())
            }
            RunOutcome::Interrupted => {
                warn!(
                    "Worker {} interrupted execution {}, lease left to expire",
                    self.name, leased.record.id
                );
                Ok(())
            }
        };

        self.running.store(false, Ordering::SeqCst);
        result
    }
}

async fn settle_failure(
    queue: &WorkQueue,
    policy: &FailurePolicy,
    record: &ExecutionRecord,
    token: uuid::Uuid,
    failure: &ExecutionFailure,
) -> Result<(), QueueError> {
    match policy.decide(record, failure, queue.now()) {
        Decision::Retry { not_before } => {
            debug!(
                execution_id = %record.id,
                attempt = record.attempt,
                %not_before,
                "Retrying after transient failure: {}",
                failure.message
            );
            queue.retry(token, &failure.message, not_before).await?;
        }
        Decision::Fail => {
            queue
                .complete(token, Completion::Failed(failure.message.clone()))
                .await?;
        }
        Decision::Abandon => {
            let detail = format!(
                "gave up after {} attempts: {}",
                record.attempt, failure.message
            );
            queue.complete(token, Completion::Abandoned(detail)).await?;
        }
    }
    Ok(())
}

struct Slot {
    worker: Arc<Worker>,
    queue: Arc<WorkQueue>,
    runner: Arc<ExecutionRunner>,
    policy: Arc<FailurePolicy>,
    queues: Arc<Vec<String>>,
    idle_poll: Duration,
    stop: CancellationToken,
    hard_stop: CancellationToken,
    total_processed: Arc<AtomicU64>,
}

impl Slot {
    async fn run(self) {
        let lease_duration = self.runner.lease_duration();
        loop {
            if self.stop.is_cancelled() {
                break;
            }

            // Armed before leasing so an enqueue racing an empty lease still wakes us.
            let work = self.queue.work_signal();
            match self
                .queue
                .lease_any(&self.queues, self.worker.name(), lease_duration)
                .await
            {
                Ok(Some(leased)) => {
                    if let Err(e) = self
                        .worker
                        .process(leased, &self.runner, &self.queue, &self.policy, &self.hard_stop)
                        .await
                    {
                        error!("Worker {} failed to settle execution: {}", self.worker.name(), e);
                    }
                    self.total_processed.fetch_add(1, Ordering::SeqCst);
                }
                Ok(None) => {
                    tokio::select! {
                        _ = self.stop.cancelled() => break,
                        _ = tokio::time::timeout(self.idle_poll, work) => {}
                    }
                }
                Err(e) => {
                    error!("Worker {} failed to lease: {}", self.worker.name(), e);
                    tokio::select! {
                        _ = self.stop.cancelled() => break,
                        _ = tokio::time::sleep(self.idle_poll) => {}
                    }
                }
            }
        }
        debug!("Worker {} stopped", self.worker.name());
    }
}

/// Fixed-size pool of worker slots consuming a set of queues.
pub struct WorkerPool {
    name: String,
    config: WorkerConfig,
    queue: Arc<WorkQueue>,
    runner: Arc<ExecutionRunner>,
    policy: Arc<FailurePolicy>,
    workers: Vec<Arc<Worker>>,
    tracker: TaskTracker,
    stop: CancellationToken,
    hard_stop: CancellationToken,
    running: AtomicBool,
    total_processed: Arc<AtomicU64>,
}

impl WorkerPool {
    /// Create a new worker pool.
    pub fn new(
        name: impl Into<String>,
        config: WorkerConfig,
        queue: Arc<WorkQueue>,
        runner: Arc<ExecutionRunner>,
        policy: Arc<FailurePolicy>,
    ) -> Self {
        let name = name.into();
        let workers = (0..config.pool_size())
            .map(|id| Arc::new(Worker::new(id, &name)))
            .collect();
        Self {
            name,
            config,
            queue,
            runner,
            policy,
            workers,
            tracker: TaskTracker::new(),
            stop: CancellationToken::new(),
            hard_stop: CancellationToken::new(),
            running: AtomicBool::new(false),
            total_processed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the worker pool. Calling it again while running is a no-op.
    /// A pool that has been shut down stays stopped.
    pub fn start(&self) {
        if self.stop.is_cancelled() {
            warn!("Worker pool {} has been shut down and cannot be restarted", self.name);
            return;
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let queues = Arc::new(self.config.queues.clone());
        for worker in &self.workers {
            let slot = Slot {
                worker: worker.clone(),
                queue: self.queue.clone(),
                runner: self.runner.clone(),
                policy: self.policy.clone(),
                queues: queues.clone(),
                idle_poll: self.config.idle_poll(),
                stop: self.stop.clone(),
                hard_stop: self.hard_stop.clone(),
                total_processed: self.total_processed.clone(),
            };
            self.tracker.spawn(slot.run());
        }
        info!(
            "Worker pool {} started with {} workers on queues {:?}",
            self.name,
            self.workers.len(),
            self.config.queues
        );
    }

    /// Stop leasing and wait for in-flight executions. Executions still
    /// running after `grace` are cancelled and their leases left to expire.
    /// Returns `true` when everything drained within the grace period.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.stop.cancel();
        self.tracker.close();

        let drained = tokio::time::timeout(grace, self.tracker.wait()).await.is_ok();
        if !drained {
            warn!(
                "Worker pool {} did not drain within {:?}, cancelling in-flight executions",
                self.name, grace
            );
            self.hard_stop.cancel();
            self.tracker.wait().await;
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Worker pool {} stopped", self.name);
        drained
    }

    /// Check if pool is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of worker slots.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    /// Get total processed execution count.
    pub fn total_processed(&self) -> u64 {
        self.total_processed.load(Ordering::SeqCst)
    }

    /// Number of slots currently running an execution.
    pub fn busy_workers(&self) -> usize {
        self.workers.iter().filter(|w| w.is_running()).count()
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
