//! Postgres progress tracker over `instructor_task_entries`.
//!
//! Each call is a single statement. Status changes are guarded by
//! `WHERE status = <expected>` so a stale worker cannot overwrite a newer one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{CheckpointAck, EntryTransition, ProgressError, ProgressResult, ProgressTracker};
use crate::models::{NewTaskEntry, TaskEntry, TaskProgress};
use crate::state_machine::TaskEntryState;

const ENTRY_COLUMNS: &str = "id, course_id, task_type, task_input, status, attempted, succeeded, \
     skipped, failed, total, task_output, last_record_id, cancel_requested, created_at, updated_at";

#[derive(Debug, FromRow)]
struct TaskEntryRow {
    id: Uuid,
    course_id: String,
    task_type: String,
    task_input: Value,
    status: String,
    attempted: i64,
    succeeded: i64,
    skipped: i64,
    failed: i64,
    total: Option<i64>,
    task_output: Option<String>,
    last_record_id: Option<i64>,
    cancel_requested: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn counter(field: &str, value: i64) -> ProgressResult<u64> {
    u64::try_from(value).map_err(|_| ProgressError::InvalidData {
        field: format!("{field}={value}"),
    })
}

fn column(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl TryFrom<TaskEntryRow> for TaskEntry {
    type Error = ProgressError;

    fn try_from(row: TaskEntryRow) -> ProgressResult<Self> {
        let status = row
            .status
            .parse::<TaskEntryState>()
            .map_err(|field| ProgressError::InvalidData { field })?;

        Ok(TaskEntry {
            id: row.id,
            course_id: row.course_id,
            task_type: row.task_type,
            task_input: row.task_input,
            status,
            progress: TaskProgress {
                attempted: counter("attempted", row.attempted)?,
                succeeded: counter("succeeded", row.succeeded)?,
                skipped: counter("skipped", row.skipped)?,
                failed: counter("failed", row.failed)?,
            },
            total: row.total.map(|t| counter("total", t)).transpose()?,
            task_output: row.task_output,
            last_record_id: row.last_record_id,
            cancel_requested: row.cancel_requested,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PgProgressTracker {
    pool: PgPool,
}

impl PgProgressTracker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProgressTracker for PgProgressTracker {
    async fn create_entry(&self, new_entry: NewTaskEntry) -> ProgressResult<TaskEntry> {
        let sql = format!(
            "INSERT INTO instructor_task_entries (id, course_id, task_type, task_input, status) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {ENTRY_COLUMNS}"
        );
        let row: TaskEntryRow = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(&new_entry.course_id)
            .bind(&new_entry.task_type)
            .bind(&new_entry.task_input)
            .bind(TaskEntryState::Queued.as_str())
            .fetch_one(&self.pool)
            .await?;

        row.try_into()
    }

    async fn load_entry(&self, entry_id: Uuid) -> ProgressResult<TaskEntry> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM instructor_task_entries WHERE id = $1");
        let row: Option<TaskEntryRow> = sqlx::query_as(&sql)
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await?;

        row.ok_or(ProgressError::EntryNotFound { entry_id })?
            .try_into()
    }

    async fn persist_transition(
        &self,
        entry_id: Uuid,
        transition: &EntryTransition,
    ) -> ProgressResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE instructor_task_entries
            SET status = $3,
                attempted = $4,
                succeeded = $5,
                skipped = $6,
                failed = $7,
                total = COALESCE($8, total),
                task_output = CASE WHEN $3 = 'running' THEN NULL
                                   ELSE COALESCE($9, task_output) END,
                last_record_id = $10,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(entry_id)
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(column(transition.progress.attempted))
        .bind(column(transition.progress.succeeded))
        .bind(column(transition.progress.skipped))
        .bind(column(transition.progress.failed))
        .bind(transition.total.map(column))
        .bind(transition.task_output.as_deref())
        .bind(transition.last_record_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let entry = self.load_entry(entry_id).await?;
            return Err(ProgressError::ConcurrentModification {
                entry_id,
                expected: transition.from.to_string(),
                actual: entry.status.to_string(),
            });
        }
        Ok(())
    }

    async fn checkpoint(
        &self,
        entry_id: Uuid,
        progress: &TaskProgress,
        last_record_id: Option<i64>,
    ) -> ProgressResult<CheckpointAck> {
        let cancel_requested: Option<bool> = sqlx::query_scalar(
            r#"
            UPDATE instructor_task_entries
            SET attempted = $2, succeeded = $3, skipped = $4, failed = $5,
                last_record_id = $6, updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            RETURNING cancel_requested
            "#,
        )
        .bind(entry_id)
        .bind(column(progress.attempted))
        .bind(column(progress.succeeded))
        .bind(column(progress.skipped))
        .bind(column(progress.failed))
        .bind(last_record_id)
        .fetch_optional(&self.pool)
        .await?;

        match cancel_requested {
            Some(cancel_requested) => Ok(CheckpointAck { cancel_requested }),
            None => {
                let entry = self.load_entry(entry_id).await?;
                Err(ProgressError::NotRunning {
                    entry_id,
                    status: entry.status.to_string(),
                })
            }
        }
    }

    async fn request_cancel(&self, entry_id: Uuid) -> ProgressResult<()> {
        let result = sqlx::query(
            "UPDATE instructor_task_entries SET cancel_requested = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(entry_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ProgressError::EntryNotFound { entry_id });
        }
        Ok(())
    }
}
