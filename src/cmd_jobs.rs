//! `cadence jobs`: inspect a persisted store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde_json::json;

use cadence_config::Config;
use cadence_scheduler::{JobDefinition, JobStore, SqliteJobStore};
use cadence_workqueue::{ExecutionState, ExecutionStore, SqliteExecutionStore};

use crate::cli::OutputFormat;

/// Print registered jobs and execution counts.
pub(crate) async fn jobs(
    config: &Config,
    state_db: Option<PathBuf>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let path = match state_db {
        Some(path) => path,
        None if config.store.is_memory() => {
            anyhow::bail!("the memory backend persists nothing, pass --state-db")
        }
        None => config.store.database_path(),
    };
    let (jobs, counts) = load(&path).await?;

    match format {
        OutputFormat::Json => {
            let output = json!({ "jobs": jobs, "executions": counts });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => print_table(&jobs, &counts),
    }
    Ok(())
}

async fn load(path: &Path) -> anyhow::Result<(Vec<JobDefinition>, BTreeMap<String, usize>)> {
    if !path.exists() {
        anyhow::bail!("no database at {}", path.display());
    }
    let jobs = SqliteJobStore::open(path).await?.list().await?;
    let counts = SqliteExecutionStore::open(path).await?.counts().await?;
    let counts = ExecutionState::ALL
        .into_iter()
        .map(|state| (state.to_string(), counts.get(&state).copied().unwrap_or(0)))
        .collect();
    Ok((jobs, counts))
}

fn print_table(jobs: &[JobDefinition], counts: &BTreeMap<String, usize>) {
    if jobs.is_empty() {
        println!("No jobs registered.");
    } else {
        println!(
            "{:<24} {:<16} {:<12} {:<8} {:<26} {}",
            "ID", "SCHEDULE", "QUEUE", "ENABLED", "NEXT FIRE", "LAST ENQUEUED"
        );
        for job in jobs {
            println!(
                "{:<24} {:<16} {:<12} {:<8} {:<26} {}",
                job.id,
                job.schedule,
                job.queue,
                job.enabled,
                job.next_fire_at.to_rfc3339(),
                job.last_enqueued_at
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string())
            );
        }
    }

    let summary: Vec<String> = counts
        .iter()
        .map(|(state, count)| format!("{}={}", state, count))
        .collect();
    println!();
    println!("Executions: {}", summary.join(" "));
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_scheduler::{JobRegistry, SystemClock};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_lists_jobs_and_counts() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cadence.db");

        let registry = JobRegistry::new(
            Arc::new(SqliteJobStore::open(&path).await.unwrap()),
            Arc::new(SystemClock),
        );
        registry
            .register("monthly-trigger-job", "0 10 * * *", "scheduler", "builtin:log")
            .await
            .unwrap();

        let (jobs, counts) = load(&path).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, "monthly-trigger-job");
        assert_eq!(counts.len(), ExecutionState::ALL.len());
        assert!(counts.values().all(|c| *c == 0));
    }

    #[tokio::test]
    async fn test_missing_database() {
        let temp_dir = TempDir::new().unwrap();
        assert!(load(&temp_dir.path().join("absent.db")).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_backend_needs_state_db() {
        let mut config = Config::default();
        config.store.backend = "memory".to_string();
        assert!(jobs(&config, None, OutputFormat::Table).await.is_err());
    }
}
