//! # Execution Contexts
//!
//! An execution context is the instantiated, mutable representation of one
//! learner's interaction with one problem. Building contexts (and the grading
//! logic behind them) belongs to the content layer; this module only fixes
//! the capability surface the update functions need.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

use crate::models::{LearnerId, SubmissionRecord};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("Content not found for problem {problem_url}")]
    ContentNotFound { problem_url: String },

    #[error("Malformed state for record {record_id}: {reason}")]
    MalformedState { record_id: i64, reason: String },

    #[error("No learner matches '{ident}' in course {course_id}")]
    LearnerNotFound { course_id: String, ident: String },

    #[error("Grading error: {0}")]
    Grading(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

pub type ContextResult<T> = Result<T, ContextError>;

/// Immutable request-scoped arguments forwarded to every context build.
///
/// Computed once per run and cloned cheaply into each per-record call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SharedArgs {
    values: Arc<Map<String, Value>>,
}

impl SharedArgs {
    pub fn new(values: Map<String, Value>) -> Self {
        Self {
            values: Arc::new(values),
        }
    }

    /// Accepts a JSON object; anything else yields empty arguments.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::new(map),
            _ => Self::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Result of re-running grading on the latest submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RescoreResult {
    /// The stored score/state was overwritten with a different value
    Changed,
    /// Grading produced what was already stored
    Unchanged,
    /// The problem's content does not support rescoring
    NotRescorable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteResult {
    Deleted,
    /// The record was gone before the delete ran
    AlreadyAbsent,
}

/// Mutable operand of an update function.
#[async_trait]
pub trait ExecutionContext: Send {
    fn record_id(&self) -> i64;

    fn learner_id(&self) -> LearnerId;

    /// Recompute the score from the latest submission and overwrite it.
    async fn rescore(&mut self) -> ContextResult<RescoreResult>;

    /// Set the attempt count to zero, leaving score and other state alone.
    async fn reset_attempts(&mut self) -> ContextResult<()>;

    /// Remove the persisted record for this learner/problem pair.
    async fn delete_state(&mut self) -> ContextResult<DeleteResult>;
}

/// Builds execution contexts for candidate records.
#[async_trait]
pub trait ExecutionContextFactory: Send + Sync {
    /// Resolve a username or email to an internal learner id.
    async fn resolve_learner(&self, course_id: &str, ident: &str) -> ContextResult<LearnerId>;

    /// Build the context for one record's course/problem/learner triple.
    ///
    /// Failures are per-record and never abort a batch.
    async fn build(
        &self,
        record: &SubmissionRecord,
        shared_args: &SharedArgs,
    ) -> ContextResult<Box<dyn ExecutionContext>>;
}
