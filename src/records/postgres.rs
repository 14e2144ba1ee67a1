//! Postgres submission source over `courseware_studentmodule`.
//!
//! Every page is one short statement on a pooled connection; nothing is held
//! open between pages.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use super::{RecordQuery, RecordResult, SubmissionSource};
use crate::models::{LearnerId, SubmissionRecord};

#[derive(Debug, FromRow)]
struct StudentModuleRow {
    id: i64,
    course_id: String,
    module_state_key: String,
    student_id: i64,
    state: Option<String>,
    modified: DateTime<Utc>,
}

impl From<StudentModuleRow> for SubmissionRecord {
    fn from(row: StudentModuleRow) -> Self {
        Self {
            id: row.id,
            course_id: row.course_id,
            problem_url: row.module_state_key,
            learner_id: LearnerId(row.student_id),
            state: row.state.unwrap_or_default(),
            modified: row.modified,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgSubmissionSource {
    pool: PgPool,
}

impl PgSubmissionSource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SubmissionSource for PgSubmissionSource {
    async fn count(&self, query: &RecordQuery) -> RecordResult<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM courseware_studentmodule
            WHERE course_id = $1
              AND module_state_key = $2
              AND ($3::BIGINT IS NULL OR student_id = $3)
            "#,
        )
        .bind(&query.course_id)
        .bind(&query.problem_url)
        .bind(query.learner_id.map(|id| id.0))
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn fetch_page(
        &self,
        query: &RecordQuery,
        after_id: Option<i64>,
        limit: usize,
    ) -> RecordResult<Vec<SubmissionRecord>> {
        let rows: Vec<StudentModuleRow> = sqlx::query_as(
            r#"
            SELECT id, course_id, module_state_key, student_id, state, modified
            FROM courseware_studentmodule
            WHERE course_id = $1
              AND module_state_key = $2
              AND ($3::BIGINT IS NULL OR student_id = $3)
              AND ($4::BIGINT IS NULL OR id > $4)
            ORDER BY id
            LIMIT $5
            "#,
        )
        .bind(&query.course_id)
        .bind(&query.problem_url)
        .bind(query.learner_id.map(|id| id.0))
        .bind(after_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SubmissionRecord::from).collect())
    }
}
