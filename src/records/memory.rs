//! In-memory submission store, ordered by record id.
//!
//! Backs embedded deployments and tests. Besides serving pages to the
//! record filter it exposes the small write surface an execution context
//! needs (state rewrite, delete).

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicI64, Ordering};

use super::{RecordError, RecordQuery, RecordResult, SubmissionSource};
use crate::models::{LearnerId, SubmissionRecord};

#[derive(Debug)]
pub struct InMemorySubmissionStore {
    records: RwLock<BTreeMap<i64, SubmissionRecord>>,
    next_id: AtomicI64,
}

impl Default for InMemorySubmissionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemorySubmissionStore {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Insert a record with the next id.
    pub fn insert(
        &self,
        course_id: &str,
        problem_url: &str,
        learner_id: LearnerId,
        state: Value,
    ) -> SubmissionRecord {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let record = SubmissionRecord {
            id,
            course_id: course_id.to_string(),
            problem_url: problem_url.to_string(),
            learner_id,
            state: state.to_string(),
            modified: Utc::now(),
        };
        self.records.write().insert(id, record.clone());
        record
    }

    /// Insert a record whose state is stored verbatim, parseable or not.
    pub fn insert_raw(
        &self,
        course_id: &str,
        problem_url: &str,
        learner_id: LearnerId,
        state: &str,
    ) -> SubmissionRecord {
        let mut record = self.insert(course_id, problem_url, learner_id, Value::Null);
        record.state = state.to_string();
        self.records.write().insert(record.id, record.clone());
        record
    }

    pub fn get(&self, record_id: i64) -> Option<SubmissionRecord> {
        self.records.read().get(&record_id).cloned()
    }

    pub fn find(
        &self,
        course_id: &str,
        problem_url: &str,
        learner_id: LearnerId,
    ) -> Option<SubmissionRecord> {
        let query = RecordQuery::new(course_id, problem_url).for_learner(learner_id);
        self.records
            .read()
            .values()
            .find(|record| query.matches(record))
            .cloned()
    }

    /// Overwrite the state blob of an existing record.
    pub fn update_state(&self, record_id: i64, state: &Value) -> RecordResult<()> {
        let mut records = self.records.write();
        let record = records
            .get_mut(&record_id)
            .ok_or(RecordError::NotFound { record_id })?;
        record.state = state.to_string();
        record.modified = Utc::now();
        Ok(())
    }

    /// Returns false when the record was already gone.
    pub fn delete(&self, record_id: i64) -> bool {
        self.records.write().remove(&record_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// All records, in id order.
    pub fn snapshot(&self) -> Vec<SubmissionRecord> {
        self.records.read().values().cloned().collect()
    }
}

#[async_trait]
impl SubmissionSource for InMemorySubmissionStore {
    async fn count(&self, query: &RecordQuery) -> RecordResult<u64> {
        Ok(self
            .records
            .read()
            .values()
            .filter(|record| query.matches(record))
            .count() as u64)
    }

    async fn fetch_page(
        &self,
        query: &RecordQuery,
        after_id: Option<i64>,
        limit: usize,
    ) -> RecordResult<Vec<SubmissionRecord>> {
        let lower = after_id.map_or(Bound::Unbounded, Bound::Excluded);
        Ok(self
            .records
            .read()
            .range((lower, Bound::Unbounded))
            .map(|(_, record)| record)
            .filter(|record| query.matches(record))
            .take(limit)
            .cloned()
            .collect())
    }
}
