//! # Task Entry Model
//!
//! Durable record tracking one background run of the batch update engine.
//!
//! ## Overview
//!
//! The request layer creates a `TaskEntry` before enqueueing work. The engine
//! is the only writer while a run is active: it moves the entry through its
//! lifecycle, checkpoints the progress counters, and stores a JSON summary as
//! `task_output` when the run ends. The engine never deletes an entry.
//!
//! ## Database Schema
//!
//! Maps to `instructor_task_entries`:
//! - `id`: Primary key (UUID)
//! - `course_id`, `task_type`: what is being run and where (TEXT)
//! - `task_input`: JSONB mapping with `problem_url` and optional `student`
//! - `status`: lifecycle state (TEXT)
//! - `attempted`, `succeeded`, `skipped`, `failed`, `total`: counters (BIGINT)
//! - `last_record_id`: highest record id the stored counters account for (BIGINT)
//! - `task_output`: final summary (TEXT)
//! - `cancel_requested`: cooperative cancellation flag (BOOLEAN)
//!
//! ## Counter Invariant
//!
//! `attempted == succeeded + skipped + failed` holds at every checkpoint, and
//! counters never decrease during a run. [`TaskProgress::record`] is the only
//! way counters move.
//!
//! ## Resuming
//!
//! Every record with an id up to `last_record_id` has been counted. A worker
//! that picks up an entry still marked `Running` continues from there with
//! the stored counters, so a crash loses at most one checkpoint interval.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::task_input_keys;
use crate::error::{InstructorTaskError, Result};
use crate::state_machine::TaskEntryState;
use crate::update::Outcome;

/// Per-run progress counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProgress {
    pub attempted: u64,
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl TaskProgress {
    /// Count one processed record.
    pub fn record(&mut self, outcome: &Outcome) {
        self.attempted += 1;
        match outcome {
            Outcome::Succeeded => self.succeeded += 1,
            Outcome::Skipped(_) => self.skipped += 1,
            Outcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.attempted == self.succeeded + self.skipped + self.failed
    }

    /// True when no counter in `self` is below the one in `earlier`.
    pub fn dominates(&self, earlier: &TaskProgress) -> bool {
        self.attempted >= earlier.attempted
            && self.succeeded >= earlier.succeeded
            && self.skipped >= earlier.skipped
            && self.failed >= earlier.failed
    }
}

/// A persisted task entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEntry {
    pub id: Uuid,
    pub course_id: String,
    pub task_type: String,
    pub task_input: Value,
    pub status: TaskEntryState,
    pub progress: TaskProgress,
    /// Records matching the query before predicate narrowing.
    pub total: Option<u64>,
    pub task_output: Option<String>,
    /// Resume cursor written with every checkpoint.
    pub last_record_id: Option<i64>,
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields the request layer supplies when it creates an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTaskEntry {
    pub course_id: String,
    pub task_type: String,
    pub task_input: Value,
}

impl NewTaskEntry {
    pub fn new(course_id: impl Into<String>, task_type: impl Into<String>, task_input: Value) -> Self {
        Self {
            course_id: course_id.into(),
            task_type: task_type.into(),
            task_input,
        }
    }
}

/// Task input mapping handed over by the queue layer.
///
/// `problem_url` is required by every task kind; its absence is reported by
/// the engine as a configuration error rather than at parse time so that the
/// task entry can be marked failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInput {
    #[serde(default)]
    pub problem_url: Option<String>,
    /// Username or email of a single learner.
    #[serde(default)]
    pub student: Option<String>,
}

impl TaskInput {
    pub fn for_problem(problem_url: impl Into<String>) -> Self {
        Self {
            problem_url: Some(problem_url.into()),
            student: None,
        }
    }

    pub fn with_student(mut self, student: impl Into<String>) -> Self {
        self.student = Some(student.into());
        self
    }

    /// Parse the queue's JSON mapping. Unknown keys are ignored.
    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value.as_object().ok_or_else(|| {
            InstructorTaskError::configuration("task input must be a JSON object")
        })?;

        let read = |key: &str| -> Result<Option<String>> {
            match map.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(other) => Err(InstructorTaskError::configuration(format!(
                    "task input key '{key}' must be a string, got {other}"
                ))),
            }
        };

        Ok(Self {
            problem_url: read(task_input_keys::PROBLEM_URL)?,
            student: read(task_input_keys::STUDENT)?,
        })
    }

    pub fn to_value(&self) -> Value {
        let mut map = serde_json::Map::new();
        if let Some(problem_url) = &self.problem_url {
            map.insert(
                task_input_keys::PROBLEM_URL.to_string(),
                Value::String(problem_url.clone()),
            );
        }
        if let Some(student) = &self.student {
            map.insert(
                task_input_keys::STUDENT.to_string(),
                Value::String(student.clone()),
            );
        }
        Value::Object(map)
    }
}
