use serde::{Deserialize, Serialize};
use std::fmt;

/// Persisted status of a task entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskEntryState {
    /// Created by the request layer, not yet picked up by a worker
    #[default]
    Queued,
    /// A worker is applying the update
    Running,
    /// The pass finished within the failure tolerance
    Succeeded,
    /// Bad input, or the pass finished with more failures than tolerated
    Failed,
    /// Cancelled, or stopped by an unrecoverable error mid-run
    Aborted,
}

impl TaskEntryState {
    /// Check if this is a terminal state (no further transitions allowed)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Check if a run has ended in this state, successfully or not
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Aborted)
    }

    /// Check if this is an active state (a worker owns the entry)
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for TaskEntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskEntryState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "aborted" => Ok(Self::Aborted),
            _ => Err(format!("Invalid task entry state: {s}")),
        }
    }
}

/// In-memory phase of one engine run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    /// Validating input and claiming the entry
    #[default]
    Initializing,
    /// Streaming candidates through the update function
    Running,
    /// The candidate sequence was exhausted
    Completed,
    /// Cancelled or stopped by an unrecoverable error
    Aborted,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    /// Whether `next` may follow this phase
    pub fn can_advance_to(&self, next: RunPhase) -> bool {
        matches!(
            (self, next),
            (Self::Initializing, Self::Running)
                | (Self::Initializing, Self::Aborted)
                | (Self::Running, Self::Completed)
                | (Self::Running, Self::Aborted)
        )
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}
