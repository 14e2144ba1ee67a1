//! # Update Functions
//!
//! The closed set of mutations the engine can apply to an execution context.
//! Exactly one function is applied per run; each carries its own candidate
//! predicate and action label.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::actions;
use crate::context::{DeleteResult, ExecutionContext, RescoreResult};
use crate::records::RecordPredicate;

/// Per-record result of applying an update function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Skipped(String),
    Failed(String),
}

impl Outcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped(reason.into())
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateFunction {
    /// Re-grade the latest submission; recompute-and-overwrite, never increment
    Rescore,
    /// Zero the attempt count
    ResetAttempts,
    /// Remove the learner's state entirely
    DeleteState,
}

impl UpdateFunction {
    /// Past-tense label used in summaries and logs.
    pub fn action_name(&self) -> &'static str {
        match self {
            Self::Rescore => actions::RESCORED,
            Self::ResetAttempts => actions::RESET,
            Self::DeleteState => actions::DELETED,
        }
    }

    /// Candidate predicate the function is only valid under.
    pub fn default_predicate(&self) -> Option<RecordPredicate> {
        match self {
            Self::Rescore => Some(RecordPredicate::AttemptDone),
            Self::ResetAttempts | Self::DeleteState => None,
        }
    }

    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::DeleteState)
    }

    /// Apply to one context. Context errors become `Outcome::Failed`.
    pub async fn apply(&self, context: &mut dyn ExecutionContext) -> Outcome {
        match self {
            Self::Rescore => match context.rescore().await {
                Ok(RescoreResult::Changed | RescoreResult::Unchanged) => Outcome::Succeeded,
                Ok(RescoreResult::NotRescorable) => {
                    Outcome::skipped("problem does not support rescoring")
                }
                Err(e) => Outcome::failed(e.to_string()),
            },
            Self::ResetAttempts => match context.reset_attempts().await {
                Ok(()) => Outcome::Succeeded,
                Err(e) => Outcome::failed(e.to_string()),
            },
            Self::DeleteState => match context.delete_state().await {
                Ok(DeleteResult::Deleted) => Outcome::Succeeded,
                Ok(DeleteResult::AlreadyAbsent) => Outcome::skipped("state already deleted"),
                Err(e) => Outcome::failed(e.to_string()),
            },
        }
    }
}

impl fmt::Display for UpdateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.action_name())
    }
}
