//! SQLite-backed job store.
//!
//! Shares the timestamp encoding of the execution store: Unix milliseconds
//! in INTEGER columns.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use tokio_rusqlite::Connection;
use tracing::debug;

use crate::error::SchedulerResult;
use crate::job::{JobDefinition, Registration};
use crate::store::JobStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS job_definitions (
    id               TEXT    PRIMARY KEY,
    schedule         TEXT    NOT NULL,
    queue            TEXT    NOT NULL,
    payload_ref      TEXT    NOT NULL,
    enabled          INTEGER NOT NULL,
    next_fire_at     INTEGER NOT NULL,
    last_enqueued_at INTEGER,
    created_at       INTEGER NOT NULL,
    updated_at       INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_jobs_due ON job_definitions(enabled, next_fire_at);
"#;

const COLUMNS: &str = "id, schedule, queue, payload_ref, enabled, next_fire_at, \
    last_enqueued_at, created_at, updated_at";

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<JobDefinition> {
    let last_enqueued_at: Option<i64> = row.get(6)?;
    Ok(JobDefinition {
        id: row.get(0)?,
        schedule: row.get(1)?,
        queue: row.get(2)?,
        payload_ref: row.get(3)?,
        enabled: row.get(4)?,
        next_fire_at: from_millis(5, row.get(5)?)?,
        last_enqueued_at: last_enqueued_at.map(|m| from_millis(6, m)).transpose()?,
        created_at: from_millis(7, row.get(7)?)?,
        updated_at: from_millis(8, row.get(8)?)?,
    })
}

/// SQLite-based job store.
pub struct SqliteJobStore {
    conn: Connection,
}

impl SqliteJobStore {
    /// Create a new in-memory database.
    pub async fn in_memory() -> SchedulerResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    /// Create a new file-backed database.
    pub async fn open(path: impl AsRef<Path>) -> SchedulerResult<Self> {
        let path = path.as_ref().to_path_buf();
        debug!("Opening job store at {:?}", path);
        let conn = Connection::open(path).await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> SchedulerResult<Self> {
        conn.call(|conn| {
            conn.busy_timeout(std::time::Duration::from_secs(5))?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn upsert(&self, job: &JobDefinition) -> SchedulerResult<Registration> {
        let j = job.clone();
        let registration = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let exists = tx
                    .query_row("SELECT 1 FROM job_definitions WHERE id = ?1", [&j.id], |_| Ok(()))
                    .optional()?
                    .is_some();
                tx.execute(
                    &format!(
                        "INSERT INTO job_definitions ({COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                         ON CONFLICT(id) DO UPDATE SET
                             schedule = excluded.schedule,
                             queue = excluded.queue,
                             payload_ref = excluded.payload_ref,
                             enabled = excluded.enabled,
                             next_fire_at = excluded.next_fire_at,
                             updated_at = excluded.updated_at"
                    ),
                    params![
                        j.id,
                        j.schedule,
                        j.queue,
                        j.payload_ref,
                        j.enabled,
                        to_millis(j.next_fire_at),
                        j.last_enqueued_at.map(to_millis),
                        to_millis(j.created_at),
                        to_millis(j.updated_at),
                    ],
                )?;
                tx.commit()?;
                Ok(if exists {
                    Registration::Updated
                } else {
                    Registration::Created
                })
            })
            .await?;
        Ok(registration)
    }

    async fn remove(&self, id: &str) -> SchedulerResult<bool> {
        let id = id.to_string();
        let deleted = self
            .conn
            .call(move |conn| Ok(conn.execute("DELETE FROM job_definitions WHERE id = ?1", [id])?))
            .await?;
        Ok(deleted == 1)
    }

    async fn get(&self, id: &str) -> SchedulerResult<Option<JobDefinition>> {
        let id = id.to_string();
        let job = self
            .conn
            .call(move |conn| {
                Ok(conn
                    .query_row(
                        &format!("SELECT {COLUMNS} FROM job_definitions WHERE id = ?1"),
                        [id],
                        row_to_job,
                    )
                    .optional()?)
            })
            .await?;
        Ok(job)
    }

    async fn list(&self) -> SchedulerResult<Vec<JobDefinition>> {
        let jobs = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {COLUMNS} FROM job_definitions ORDER BY id"))?;
                let jobs = stmt
                    .query_map([], row_to_job)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(jobs)
            })
            .await?;
        Ok(jobs)
    }

    async fn due(&self, now: DateTime<Utc>, limit: usize) -> SchedulerResult<Vec<JobDefinition>> {
        let now_ms = to_millis(now);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let jobs = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM job_definitions
                     WHERE enabled = 1 AND next_fire_at <= ?1
                     ORDER BY next_fire_at, id
                     LIMIT ?2"
                ))?;
                let jobs = stmt
                    .query_map(params![now_ms, limit], row_to_job)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(jobs)
            })
            .await?;
        Ok(jobs)
    }

    async fn advance(
        &self,
        id: &str,
        expected: DateTime<Utc>,
        next: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let id = id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE job_definitions
                     SET next_fire_at = ?1, last_enqueued_at = ?2, updated_at = ?2
                     WHERE id = ?3 AND next_fire_at = ?4",
                    params![to_millis(next), to_millis(now), id, to_millis(expected)],
                )?)
            })
            .await?;
        Ok(changed == 1)
    }

    async fn set_enabled(
        &self,
        id: &str,
        enabled: bool,
        next_fire_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> SchedulerResult<bool> {
        let id = id.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE job_definitions
                     SET enabled = ?1, next_fire_at = COALESCE(?2, next_fire_at), updated_at = ?3
                     WHERE id = ?4",
                    params![enabled, next_fire_at.map(to_millis), to_millis(now), id],
                )?)
            })
            .await?;
        Ok(changed == 1)
    }
}

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;
