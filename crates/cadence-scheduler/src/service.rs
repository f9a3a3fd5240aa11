//! The scheduler service: registry, trigger loop, work queue, worker pool
//! and lease reclaimer wired together.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;
use uuid::Uuid;

use cadence_workqueue::{
    Clock, EventSink, ExecutionRecord, ExecutionRunner, ExecutionState, ExecutionStore,
    FailurePolicy, HandlerRegistry, LeaseReclaimer, MemoryExecutionStore, QueueConfig,
    RetryConfig, SystemClock, TracingEventSink, WorkQueue, WorkerConfig, WorkerPool,
};

use crate::config::TriggerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::job::{JobDefinition, Registration};
use crate::registry::JobRegistry;
use crate::store::{JobStore, MemoryJobStore};
use crate::trigger::TriggerLoop;

/// Builder for [`Scheduler`]. Unset stores default to memory, the clock to
/// the wall clock and events to the log.
pub struct SchedulerBuilder {
    name: String,
    clock: Option<Arc<dyn Clock>>,
    job_store: Option<Arc<dyn JobStore>>,
    execution_store: Option<Arc<dyn ExecutionStore>>,
    events: Option<Arc<dyn EventSink>>,
    handlers: Arc<HandlerRegistry>,
    trigger: TriggerConfig,
    queue: QueueConfig,
    worker: WorkerConfig,
    retry: RetryConfig,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self {
            name: "cadence".to_string(),
            clock: None,
            job_store: None,
            execution_store: None,
            events: None,
            handlers: Arc::new(HandlerRegistry::new()),
            trigger: TriggerConfig::default(),
            queue: QueueConfig::default(),
            worker: WorkerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of the worker pool; worker names derive from it.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn job_store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.job_store = Some(store);
        self
    }

    pub fn execution_store(mut self, store: Arc<dyn ExecutionStore>) -> Self {
        self.execution_store = Some(store);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn handlers(mut self, handlers: Arc<HandlerRegistry>) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn trigger_config(mut self, config: TriggerConfig) -> Self {
        self.trigger = config;
        self
    }

    pub fn queue_config(mut self, config: QueueConfig) -> Self {
        self.queue = config;
        self
    }

    pub fn worker_config(mut self, config: WorkerConfig) -> Self {
        self.worker = config;
        self
    }

    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    pub fn build(self) -> Scheduler {
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let job_store = self.job_store.unwrap_or_else(|| Arc::new(MemoryJobStore::new()));
        let execution_store = self
            .execution_store
            .unwrap_or_else(|| Arc::new(MemoryExecutionStore::new()));
        let events = self.events.unwrap_or_else(|| Arc::new(TracingEventSink));

        let registry = Arc::new(JobRegistry::new(job_store, clock.clone()));
        let queue = Arc::new(WorkQueue::new(execution_store, clock, events));
        let policy = Arc::new(FailurePolicy::new(self.retry));
        let runner = Arc::new(ExecutionRunner::new(
            queue.clone(),
            self.handlers.clone(),
            self.queue.lease_timeout(),
            self.worker.execution_timeout(),
        ));
        let pool = Arc::new(WorkerPool::new(
            self.name,
            self.worker.clone(),
            queue.clone(),
            runner,
            policy.clone(),
        ));
        let trigger = Arc::new(TriggerLoop::new(registry.clone(), queue.clone(), self.trigger));
        let reclaimer = Arc::new(LeaseReclaimer::new(queue.clone(), policy, self.queue));

        Scheduler {
            registry,
            queue,
            handlers: self.handlers,
            trigger,
            reclaimer,
            pool,
            shutdown_grace: self.worker.shutdown_grace(),
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            running: AtomicBool::new(false),
        }
    }
}

/// Recurring job scheduler and execution engine.
pub struct Scheduler {
    registry: Arc<JobRegistry>,
    queue: Arc<WorkQueue>,
    handlers: Arc<HandlerRegistry>,
    trigger: Arc<TriggerLoop>,
    reclaimer: Arc<LeaseReclaimer>,
    pool: Arc<WorkerPool>,
    shutdown_grace: Duration,
    tracker: TaskTracker,
    cancel: CancellationToken,
    running: AtomicBool,
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// Start the worker pool, the trigger loop and the reclaimer.
    /// Calling it again while running is a no-op. A scheduler that has been
    /// shut down cannot be restarted; build a new one instead.
    pub fn start(&self) -> SchedulerResult<()> {
        if self.cancel.is_cancelled() {
            return Err(SchedulerError::ShutDown);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        self.pool.start();

        let trigger = self.trigger.clone();
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move { trigger.run(cancel).await });

        let reclaimer = self.reclaimer.clone();
        let cancel = self.cancel.clone();
        self.tracker.spawn(async move { reclaimer.run(cancel).await });

        info!(
            workers = self.pool.size(),
            handlers = self.handlers.len(),
            "Scheduler started"
        );
        Ok(())
    }

    /// Stop triggering, then drain the worker pool within the configured
    /// grace period. Returns `true` when every execution finished in time.
    pub async fn shutdown(&self) -> bool {
        self.shutdown_with_grace(self.shutdown_grace).await
    }

    pub async fn shutdown_with_grace(&self, grace: Duration) -> bool {
        info!("Scheduler shutting down");
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        let drained = self.pool.shutdown(grace).await;
        self.running.store(false, Ordering::SeqCst);
        info!(drained, "Scheduler stopped");
        drained
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Register or update a recurring job.
    pub async fn register(
        &self,
        id: &str,
        schedule: &str,
        queue: &str,
        payload_ref: &str,
    ) -> SchedulerResult<Registration> {
        self.registry.register(id, schedule, queue, payload_ref).await
    }

    pub async fn deregister(&self, id: &str) -> SchedulerResult<()> {
        self.registry.deregister(id).await
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> SchedulerResult<()> {
        self.registry.set_enabled(id, enabled).await
    }

    /// Run `id` once now, outside its schedule.
    pub async fn trigger_now(&self, id: &str) -> SchedulerResult<Uuid> {
        self.trigger.trigger_now(id).await
    }

    pub async fn jobs(&self) -> SchedulerResult<Vec<JobDefinition>> {
        self.registry.list().await
    }

    pub async fn job(&self, id: &str) -> SchedulerResult<JobDefinition> {
        self.registry.get(id).await
    }

    /// Execution history of `job_id`, oldest first.
    pub async fn executions(&self, job_id: &str) -> SchedulerResult<Vec<ExecutionRecord>> {
        Ok(self.queue.records_for_job(job_id).await?)
    }

    /// Execution records per state.
    pub async fn counts(&self) -> SchedulerResult<HashMap<ExecutionState, usize>> {
        Ok(self.queue.counts().await?)
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<WorkQueue> {
        &self.queue
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub fn trigger(&self) -> &Arc<TriggerLoop> {
        &self.trigger
    }

    pub fn reclaimer(&self) -> &Arc<LeaseReclaimer> {
        &self.reclaimer
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
