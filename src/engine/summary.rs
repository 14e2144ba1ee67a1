use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::models::TaskProgress;
use crate::state_machine::{RunPhase, TaskEntryState};

/// Why a run stopped before exhausting its candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    /// The entry's cancel flag was observed
    Cancelled,
    /// Progress could not be checkpointed after the configured retries
    CheckpointFailed { message: String },
    /// The record source could not enumerate candidates
    EnumerationFailed { message: String },
    /// The entry's status could not be written
    EntryUpdateFailed { message: String },
}

impl AbortReason {
    /// Cancellation is final; everything else may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled by request"),
            Self::CheckpointFailed { message } => write!(f, "checkpoint failed: {message}"),
            Self::EnumerationFailed { message } => {
                write!(f, "could not enumerate records: {message}")
            }
            Self::EntryUpdateFailed { message } => {
                write!(f, "could not update task entry: {message}")
            }
        }
    }
}

/// What a run reports back to the queue layer.
///
/// The same value, serialized to JSON, is stored as the entry's
/// `task_output` when the run ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub entry_id: Uuid,
    pub action_name: String,
    pub phase: RunPhase,
    pub status: TaskEntryState,
    #[serde(flatten)]
    pub progress: TaskProgress,
    /// Records matching course, problem and learner before predicate narrowing
    pub total: Option<u64>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<AbortReason>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.status == TaskEntryState::Succeeded
    }

    /// Whether the queue layer should redeliver the entry.
    pub fn is_retryable(&self) -> bool {
        self.abort_reason
            .as_ref()
            .is_some_and(AbortReason::is_retryable)
    }

    /// Run-level error description, if any.
    pub fn error(&self) -> Option<String> {
        if let Some(reason) = &self.abort_reason {
            return Some(reason.to_string());
        }
        (self.status == TaskEntryState::Failed).then(|| {
            format!(
                "{} of {} attempted records failed, exceeding the failure tolerance",
                self.progress.failed, self.progress.attempted
            )
        })
    }

    pub fn to_json(&self) -> String {
        // Plain data with string keys; serialization cannot fail
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} of {} records ({} skipped, {} failed) - {}",
            self.action_name,
            self.progress.succeeded,
            self.progress.attempted,
            self.progress.skipped,
            self.progress.failed,
            self.status
        )?;
        if let Some(error) = self.error() {
            write!(f, ": {error}")?;
        }
        Ok(())
    }
}
