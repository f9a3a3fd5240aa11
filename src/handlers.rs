//! Built-in job handlers.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use tracing::info;

use cadence_workqueue::{ExecutionFailure, HandlerRegistry, JobContext, JobHandler};

/// Payload reference of [`LogHandler`].
pub(crate) const LOG_HANDLER: &str = "builtin:log";

/// Register every built-in handler.
pub(crate) fn register_builtin(handlers: &HandlerRegistry) {
    handlers.register(LOG_HANDLER, Arc::new(LogHandler));
}

/// `YYYY-MM` of the month before `at`.
pub(crate) fn previous_month(at: DateTime<Utc>) -> Option<String> {
    let last_day = at.date_naive().with_day(1)?.pred_opt()?;
    Some(last_day.format("%Y-%m").to_string())
}

/// Logs each occurrence together with the reporting period it covers.
pub(crate) struct LogHandler;

#[async_trait]
impl JobHandler for LogHandler {
    async fn run(&self, ctx: JobContext) -> Result<(), ExecutionFailure> {
        let period = previous_month(ctx.fire_time).ok_or_else(|| {
            ExecutionFailure::permanent(format!("no month precedes {}", ctx.fire_time))
        })?;
        info!(
            job_id = %ctx.job_id,
            execution_id = %ctx.execution_id,
            attempt = ctx.attempt,
            fire_time = %ctx.fire_time,
            period = %period,
            "Job fired"
        );
        Ok(())
    }
}
