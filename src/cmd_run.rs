//! `cadence run`: the scheduler service in foreground.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use cadence_config::{Config, ConfigValidator, JobEntry};
use cadence_scheduler::{Registration, Scheduler, SqliteJobStore};
use cadence_workqueue::{HandlerRegistry, SqliteExecutionStore, TracingEventSink};

use crate::handlers;
use crate::signal;

/// Run the scheduler until SIGTERM or SIGINT.
pub(crate) async fn run(config: Config) -> anyhow::Result<()> {
    info!("Starting Cadence v{}", env!("CARGO_PKG_VERSION"));

    let warnings = ConfigValidator::validate(&config)
        .into_result()
        .context("invalid configuration")?;
    for warning in &warnings {
        warn!("Config: {}", warning);
    }

    let handlers = Arc::new(HandlerRegistry::new());
    handlers::register_builtin(&handlers);

    let scheduler = build_scheduler(&config, handlers).await?;
    register_jobs(&scheduler, &config.jobs).await?;
    scheduler.start()?;

    signal::shutdown_signal()
        .await
        .context("failed to install signal handlers")?;

    if !scheduler.shutdown().await {
        warn!("Some executions were interrupted, their leases will be reclaimed on next start");
    }
    info!("Cadence stopped");
    Ok(())
}

/// Build the scheduler on the configured store backend.
pub(crate) async fn build_scheduler(
    config: &Config,
    handlers: Arc<HandlerRegistry>,
) -> anyhow::Result<Scheduler> {
    let mut builder = Scheduler::builder()
        .handlers(handlers)
        .events(Arc::new(TracingEventSink))
        .trigger_config(config.scheduler.clone())
        .queue_config(config.queue.clone())
        .worker_config(config.worker.clone())
        .retry_config(config.retry.clone());

    if config.store.is_memory() {
        info!("Using in-memory store");
    } else {
        let path = config.store.database_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        info!("Using SQLite store at {}", path.display());
        builder = builder
            .job_store(Arc::new(SqliteJobStore::open(&path).await?))
            .execution_store(Arc::new(SqliteExecutionStore::open(&path).await?));
    }

    Ok(builder.build())
}

/// Register the jobs listed in the configuration. Registration is
/// idempotent; the `enabled` flag of each entry is applied on every start.
pub(crate) async fn register_jobs(scheduler: &Scheduler, jobs: &[JobEntry]) -> anyhow::Result<()> {
    for job in jobs {
        if !scheduler.handlers().contains(&job.payload_ref) {
            warn!(
                job_id = %job.id,
                payload_ref = %job.payload_ref,
                "No handler for payload, executions of this job will fail"
            );
        }

        let registration = scheduler
            .register(&job.id, &job.schedule, &job.queue, &job.payload_ref)
            .await
            .with_context(|| format!("failed to register job '{}'", job.id))?;
        scheduler.set_enabled(&job.id, job.enabled).await?;

        if registration == Registration::Created && !job.enabled {
            info!(job_id = %job.id, "Job registered paused");
        }
    }
    Ok(())
}
