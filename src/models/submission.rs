//! # Submission Record Model
//!
//! One learner's persisted state for one problem within one course. Records
//! are created by learner activity; the engine only reads them, rewrites
//! their state through an execution context, or deletes them.
//!
//! Maps to `courseware_studentmodule` (`id`, `course_id`, `module_state_key`,
//! `student_id`, `state`, `modified`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Internal learner identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LearnerId(pub i64);

impl fmt::Display for LearnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for LearnerId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub id: i64,
    pub course_id: String,
    pub problem_url: String,
    pub learner_id: LearnerId,
    /// Opaque JSON state blob owned by the problem's content.
    pub state: String,
    pub modified: DateTime<Utc>,
}

impl SubmissionRecord {
    pub fn state_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.state)
    }

    /// Whether the learner's last attempt was checked.
    ///
    /// Unparseable state is treated as not done.
    pub fn attempt_done(&self) -> bool {
        self.state_json()
            .ok()
            .and_then(|state| state.get("done").and_then(Value::as_bool))
            .unwrap_or(false)
    }
}
