//! SQLite-backed execution store.
//!
//! Timestamps are stored as Unix milliseconds so range predicates compare
//! numerically. Read-check-write sequences run inside `BEGIN IMMEDIATE`
//! transactions so they stay atomic even when several processes share the
//! database file.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use tokio_rusqlite::Connection;
use tracing::debug;
use uuid::Uuid;

use crate::error::QueueError;
use crate::execution::{Completion, ExecutionRecord, ExecutionState};
use crate::store::ExecutionStore;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS execution_records (
    id               TEXT    PRIMARY KEY,
    job_id           TEXT    NOT NULL,
    queue            TEXT    NOT NULL,
    payload_ref      TEXT    NOT NULL,
    fire_time        INTEGER NOT NULL,
    attempt          INTEGER NOT NULL,
    state            TEXT    NOT NULL,
    lease_token      TEXT,
    lease_owner      TEXT,
    lease_expires_at INTEGER,
    enqueued_at      INTEGER NOT NULL,
    available_at     INTEGER NOT NULL,
    started_at       INTEGER,
    finished_at      INTEGER,
    updated_at       INTEGER NOT NULL,
    last_error       TEXT
);

CREATE INDEX IF NOT EXISTS idx_executions_job ON execution_records(job_id, state);
CREATE INDEX IF NOT EXISTS idx_executions_queue ON execution_records(queue, state, available_at);
CREATE INDEX IF NOT EXISTS idx_executions_token ON execution_records(lease_token);
"#;

const COLUMNS: &str = "id, job_id, queue, payload_ref, fire_time, attempt, state, lease_token, \
    lease_owner, lease_expires_at, enqueued_at, available_at, started_at, finished_at, \
    updated_at, last_error";

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(idx: usize, millis: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis).ok_or_else(|| {
        rusqlite::Error::IntegralValueOutOfRange(idx, millis)
    })
}

fn opt_from_millis(idx: usize, millis: Option<i64>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    millis.map(|m| from_millis(idx, m)).transpose()
}

fn parse_uuid(idx: usize, value: &str) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<ExecutionRecord> {
    let id: String = row.get(0)?;
    let state: String = row.get(6)?;
    let token: Option<String> = row.get(7)?;

    Ok(ExecutionRecord {
        id: parse_uuid(0, &id)?,
        job_id: row.get(1)?,
        queue: row.get(2)?,
        payload_ref: row.get(3)?,
        fire_time: from_millis(4, row.get(4)?)?,
        attempt: row.get(5)?,
        state: state.parse().map_err(|e: QueueError| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?,
        lease_token: token.as_deref().map(|t| parse_uuid(7, t)).transpose()?,
        lease_owner: row.get(8)?,
        lease_expires_at: opt_from_millis(9, row.get(9)?)?,
        enqueued_at: from_millis(10, row.get(10)?)?,
        available_at: from_millis(11, row.get(11)?)?,
        started_at: opt_from_millis(12, row.get(12)?)?,
        finished_at: opt_from_millis(13, row.get(13)?)?,
        updated_at: from_millis(14, row.get(14)?)?,
        last_error: row.get(15)?,
    })
}

fn select_by_id(
    conn: &rusqlite::Connection,
    id: &str,
) -> rusqlite::Result<Option<ExecutionRecord>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM execution_records WHERE id = ?1"),
        [id],
        row_to_record,
    )
    .optional()
}

fn select_in_flight_by_token(
    conn: &rusqlite::Connection,
    token: &str,
) -> rusqlite::Result<Option<ExecutionRecord>> {
    conn.query_row(
        &format!(
            "SELECT {COLUMNS} FROM execution_records
             WHERE lease_token = ?1 AND state IN ('leased', 'running')"
        ),
        [token],
        row_to_record,
    )
    .optional()
}

/// Result of a guarded write: the updated record, or the reason the guard
/// rejected the write.
enum Guarded {
    Updated(ExecutionRecord),
    Rejected(String),
}

/// Load the in-flight record holding `token`, check the lease at `now` (and
/// the expected state, when given), then apply `update` to it.
fn guarded_update<F>(
    conn: &mut rusqlite::Connection,
    token: Uuid,
    now: DateTime<Utc>,
    require: Option<ExecutionState>,
    update: F,
) -> rusqlite::Result<Guarded>
where
    F: FnOnce(&rusqlite::Transaction<'_>, &ExecutionRecord) -> rusqlite::Result<()>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let Some(record) = select_in_flight_by_token(&tx, &token.to_string())? else {
        return Ok(Guarded::Rejected(
            "no in-flight record holds this lease".to_string(),
        ));
    };
    if let Err(QueueError::LeaseConflict { reason, .. }) = record.check_lease(token, now) {
        return Ok(Guarded::Rejected(reason));
    }
    if let Some(required) = require {
        if record.state != required {
            return Ok(Guarded::Rejected(format!("record is {}", record.state)));
        }
    }
    update(&tx, &record)?;
    let updated = select_by_id(&tx, &record.id.to_string())?;
    tx.commit()?;
    Ok(match updated {
        Some(record) => Guarded::Updated(record),
        None => Guarded::Rejected("record vanished".to_string()),
    })
}

fn into_result(token: Uuid, guarded: Guarded) -> Result<ExecutionRecord, QueueError> {
    match guarded {
        Guarded::Updated(record) => Ok(record),
        Guarded::Rejected(reason) => Err(QueueError::conflict(token, reason)),
    }
}

/// SQLite-based execution store.
pub struct SqliteExecutionStore {
    conn: Connection,
}

impl SqliteExecutionStore {
    /// Create a new in-memory database.
    pub async fn in_memory() -> Result<Self, QueueError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    /// Create a new file-backed database.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, QueueError> {
        let path = path.as_ref().to_path_buf();
        debug!("Opening execution store at {:?}", path);
        let conn = Connection::open(path).await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, QueueError> {
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
impl ExecutionStore for SqliteExecutionStore {
    async fn insert(&self, record: &ExecutionRecord) -> Result<(), QueueError> {
        let r = record.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO execution_records ({COLUMNS})
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
                    ),
                    params![
                        r.id.to_string(),
                        r.job_id,
                        r.queue,
                        r.payload_ref,
                        to_millis(r.fire_time),
                        r.attempt,
                        r.state.as_str(),
                        r.lease_token.map(|t| t.to_string()),
                        r.lease_owner,
                        r.lease_expires_at.map(to_millis),
                        to_millis(r.enqueued_at),
                        to_millis(r.available_at),
                        r.started_at.map(to_millis),
                        r.finished_at.map(to_millis),
                        to_millis(r.updated_at),
                        r.last_error,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExecutionRecord>, QueueError> {
        let id = id.to_string();
        Ok(self.conn.call(move |conn| Ok(select_by_id(conn, &id)?)).await?)
    }

    async fn lease_next(
        &self,
        queue: &str,
        owner: &str,
        now: DateTime<Utc>,
        duration: Duration,
    ) -> Result<Option<ExecutionRecord>, QueueError> {
        let queue = queue.to_string();
        let owner = owner.to_string();
        let now_ms = to_millis(now);
        let expires_ms = to_millis(now + duration);
        let token = Uuid::new_v4().to_string();

        let leased = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let candidate: Option<String> = tx
                    .query_row(
                        "SELECT e.id FROM execution_records AS e
                         WHERE e.queue = ?1 AND e.state = 'pending' AND e.available_at <= ?2
                           AND NOT EXISTS (
                               SELECT 1 FROM execution_records AS f
                               WHERE f.job_id = e.job_id AND f.state IN ('leased', 'running')
                           )
                         ORDER BY e.available_at, e.enqueued_at, e.id
                         LIMIT 1",
                        params![queue, now_ms],
                        |row| row.get(0),
                    )
                    .optional()?;

                let Some(id) = candidate else {
                    return Ok(None);
                };

                let changed = tx.execute(
                    "UPDATE execution_records
                     SET state = 'leased', lease_token = ?1, lease_owner = ?2,
                         lease_expires_at = ?3, updated_at = ?4
                     WHERE id = ?5 AND state = 'pending'",
                    params![token, owner, expires_ms, now_ms, id],
                )?;
                if changed == 0 {
                    return Ok(None);
                }

                let record = select_by_id(&tx, &id)?;
                tx.commit()?;
                Ok(record)
            })
            .await?;
        Ok(leased)
    }

    async fn start(&self, token: Uuid, now: DateTime<Utc>) -> Result<ExecutionRecord, QueueError> {
        let guarded = self
            .conn
            .call(move |conn| {
                Ok(guarded_update(
                    conn,
                    token,
                    now,
                    Some(ExecutionState::Leased),
                    |tx, record| {
                        tx.execute(
                            "UPDATE execution_records
                             SET state = 'running', started_at = ?1, updated_at = ?1
                             WHERE id = ?2",
                            params![to_millis(now), record.id.to_string()],
                        )?;
                        Ok(())
                    },
                )?)
            })
            .await?;
        into_result(token, guarded)
    }

    async fn renew(
        &self,
        token: Uuid,
        extension: Duration,
        now: DateTime<Utc>,
    ) -> Result<ExecutionRecord, QueueError> {
        let guarded = self
            .conn
            .call(move |conn| {
                Ok(guarded_update(conn, token, now, None, |tx, record| {
                    tx.execute(
                        "UPDATE execution_records
                         SET lease_expires_at = ?1, updated_at = ?2
                         WHERE id = ?3",
                        params![
                            to_millis(now + extension),
                            to_millis(now),
                            record.id.to_string()
                        ],
                    )?;
                    Ok(())
                })?)
            })
            .await?;
        into_result(token, guarded)
    }

    async fn finish(
        &self,
        token: Uuid,
        completion: &Completion,
        now: DateTime<Utc>,
    ) -> Result<ExecutionRecord, QueueError> {
        let state = completion.state().as_str();
        let detail = completion.detail().map(str::to_string);
        let guarded = self
            .conn
            .call(move |conn| {
                Ok(guarded_update(conn, token, now, None, |tx, record| {
                    tx.execute(
                        "UPDATE execution_records
                         SET state = ?1, last_error = ?2, lease_expires_at = NULL,
                             finished_at = ?3, updated_at = ?3
                         WHERE id = ?4",
                        params![state, detail, to_millis(now), record.id.to_string()],
                    )?;
                    Ok(())
                })?)
            })
            .await?;
        into_result(token, guarded)
    }

    async fn retry(
        &self,
        token: Uuid,
        error: &str,
        available_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<ExecutionRecord, QueueError> {
        let error = error.to_string();
        let guarded = self
            .conn
            .call(move |conn| {
                Ok(guarded_update(conn, token, now, None, |tx, record| {
                    tx.execute(
                        "UPDATE execution_records
                         SET state = 'pending', attempt = attempt + 1, available_at = ?1,
                             last_error = ?2, lease_token = NULL, lease_owner = NULL,
                             lease_expires_at = NULL, updated_at = ?3
                         WHERE id = ?4",
                        params![
                            to_millis(available_at),
                            error,
                            to_millis(now),
                            record.id.to_string()
                        ],
                    )?;
                    Ok(())
                })?)
            })
            .await?;
        into_result(token, guarded)
    }

    async fn expired(&self, now: DateTime<Utc>) -> Result<Vec<ExecutionRecord>, QueueError> {
        let now_ms = to_millis(now);
        let records = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM execution_records
                     WHERE state IN ('leased', 'running') AND lease_expires_at <= ?1
                     ORDER BY lease_expires_at"
                ))?;
                let records = stmt
                    .query_map([now_ms], row_to_record)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(records)
            })
            .await?;
        Ok(records)
    }

    async fn reclaim(
        &self,
        id: Uuid,
        token: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let now_ms = to_millis(now);
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE execution_records
                     SET state = 'pending', attempt = attempt + 1, available_at = ?1,
                         last_error = 'lease expired', lease_token = NULL, lease_owner = NULL,
                         lease_expires_at = NULL, updated_at = ?1
                     WHERE id = ?2 AND lease_token = ?3
                       AND state IN ('leased', 'running') AND lease_expires_at <= ?1",
                    params![now_ms, id.to_string(), token.to_string()],
                )?)
            })
            .await?;
        Ok(changed == 1)
    }

    async fn abandon(
        &self,
        id: Uuid,
        token: Uuid,
        detail: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, QueueError> {
        let now_ms = to_millis(now);
        let detail = detail.to_string();
        let changed = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "UPDATE execution_records
                     SET state = 'abandoned', last_error = ?1, lease_expires_at = NULL,
                         finished_at = ?2, updated_at = ?2
                     WHERE id = ?3 AND lease_token = ?4
                       AND state IN ('leased', 'running') AND lease_expires_at <= ?2",
                    params![detail, now_ms, id.to_string(), token.to_string()],
                )?)
            })
            .await?;
        Ok(changed == 1)
    }

    async fn list_for_job(&self, job_id: &str) -> Result<Vec<ExecutionRecord>, QueueError> {
        let job_id = job_id.to_string();
        let records = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {COLUMNS} FROM execution_records
                     WHERE job_id = ?1 ORDER BY enqueued_at, id"
                ))?;
                let records = stmt
                    .query_map([job_id], row_to_record)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(records)
            })
            .await?;
        Ok(records)
    }

    async fn counts(&self) -> Result<HashMap<ExecutionState, usize>, QueueError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn
                    .prepare("SELECT state, COUNT(*) FROM execution_records GROUP BY state")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        let mut counts = HashMap::new();
        for (state, count) in rows {
            counts.insert(state.parse::<ExecutionState>()?, count as usize);
        }
        Ok(counts)
    }

    async fn purge_finished(&self, before: DateTime<Utc>) -> Result<usize, QueueError> {
        let before_ms = to_millis(before);
        let deleted = self
            .conn
            .call(move |conn| {
                Ok(conn.execute(
                    "DELETE FROM execution_records
                     WHERE state IN ('succeeded', 'failed', 'abandoned') AND finished_at < ?1",
                    [before_ms],
                )?)
            })
            .await?;
        Ok(deleted)
    }
}

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;
