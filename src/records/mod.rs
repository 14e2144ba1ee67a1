//! # Record Filter
//!
//! Streams the candidate submission records for one course/problem, optionally
//! one learner, in ascending record id order.
//!
//! Candidates are fetched page by page with keyset pagination
//! (`id > last_seen ORDER BY id LIMIT page_size`), so a scan over hundreds of
//! thousands of records never materializes them all and never holds a cursor
//! or transaction open between pages. Ordering by id is stable for the whole
//! run even when earlier records are deleted mid-scan.
//!
//! [`RecordPredicate`]s are evaluated on the raw record while streaming,
//! before any execution context is built.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::models::{LearnerId, SubmissionRecord};

pub use memory::InMemorySubmissionStore;
pub use postgres::PgSubmissionSource;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Record {record_id} not found")]
    NotFound { record_id: i64 },

    #[error("Record source unavailable: {reason}")]
    Unavailable { reason: String },
}

pub type RecordResult<T> = Result<T, RecordError>;

/// Which records a run targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordQuery {
    pub course_id: String,
    pub problem_url: String,
    pub learner_id: Option<LearnerId>,
}

impl RecordQuery {
    pub fn new(course_id: impl Into<String>, problem_url: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            problem_url: problem_url.into(),
            learner_id: None,
        }
    }

    pub fn for_learner(mut self, learner_id: LearnerId) -> Self {
        self.learner_id = Some(learner_id);
        self
    }

    pub fn matches(&self, record: &SubmissionRecord) -> bool {
        record.course_id == self.course_id
            && record.problem_url == self.problem_url
            && self.learner_id.map_or(true, |id| record.learner_id == id)
    }
}

/// Cheap predicates evaluated before context construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordPredicate {
    /// The record's state marks the last attempt as checked
    AttemptDone,
}

impl RecordPredicate {
    pub fn matches(&self, record: &SubmissionRecord) -> bool {
        match self {
            Self::AttemptDone => record.attempt_done(),
        }
    }
}

/// Paged read access to submission records.
#[async_trait]
pub trait SubmissionSource: Send + Sync {
    /// Number of records matching the query.
    async fn count(&self, query: &RecordQuery) -> RecordResult<u64>;

    /// Up to `limit` matching records with id greater than `after_id`,
    /// ordered by id ascending.
    async fn fetch_page(
        &self,
        query: &RecordQuery,
        after_id: Option<i64>,
        limit: usize,
    ) -> RecordResult<Vec<SubmissionRecord>>;
}

#[derive(Clone)]
pub struct RecordFilter {
    source: Arc<dyn SubmissionSource>,
    predicates: Vec<RecordPredicate>,
    page_size: usize,
}

impl std::fmt::Debug for RecordFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordFilter")
            .field("predicates", &self.predicates)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl RecordFilter {
    pub fn new(source: Arc<dyn SubmissionSource>, page_size: usize) -> Self {
        Self {
            source,
            predicates: Vec::new(),
            page_size: page_size.max(1),
        }
    }

    /// Add predicates; a candidate must satisfy every one of them.
    pub fn with_predicates(mut self, predicates: impl IntoIterator<Item = RecordPredicate>) -> Self {
        for predicate in predicates {
            if !self.predicates.contains(&predicate) {
                self.predicates.push(predicate);
            }
        }
        self
    }

    pub fn predicates(&self) -> &[RecordPredicate] {
        &self.predicates
    }

    /// Total records for the query, before predicate narrowing.
    pub async fn count(&self, query: &RecordQuery) -> RecordResult<u64> {
        self.source.count(query).await
    }

    /// Lazily stream candidates. A page is only fetched once the previous
    /// one has been consumed.
    pub fn select(&self, query: RecordQuery) -> BoxStream<'static, RecordResult<SubmissionRecord>> {
        self.select_after(query, None)
    }

    /// Like [`select`](Self::select), starting after record id `after_id`.
    ///
    /// Used to resume a run from the last checkpointed record.
    pub fn select_after(
        &self,
        query: RecordQuery,
        after_id: Option<i64>,
    ) -> BoxStream<'static, RecordResult<SubmissionRecord>> {
        let source = Arc::clone(&self.source);
        let page_size = self.page_size;
        let predicates = self.predicates.clone();

        // `None` once the last page has been seen; otherwise the keyset cursor.
        let pages = stream::try_unfold(Some(after_id), move |cursor| {
            let source = Arc::clone(&source);
            let query = query.clone();
            async move {
                let Some(after_id) = cursor else {
                    return Ok::<_, RecordError>(None);
                };
                let page = source.fetch_page(&query, after_id, page_size).await?;
                debug!(
                    course_id = %query.course_id,
                    problem_url = %query.problem_url,
                    after_id = ?after_id,
                    fetched = page.len(),
                    "Fetched candidate page"
                );
                if page.is_empty() {
                    return Ok(None);
                }
                let next = if page.len() < page_size {
                    None
                } else {
                    page.last().map(|record| Some(record.id))
                };
                Ok(Some((page, next)))
            }
        });

        pages
            .map_ok(|page| stream::iter(page.into_iter().map(Ok::<_, RecordError>)))
            .try_flatten()
            .try_filter(move |record| {
                let keep = predicates.iter().all(|p| p.matches(record));
                if !keep {
                    debug!(record_id = record.id, "Candidate excluded by predicate");
                }
                futures::future::ready(keep)
            })
            .boxed()
    }
}
