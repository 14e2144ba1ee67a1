use serde::{Deserialize, Serialize};

/// Events that can trigger task entry state transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum TaskEntryEvent {
    /// A worker begins (or resumes) a pass over the records
    Start,
    /// The pass finished within the failure tolerance
    Complete,
    /// The run failed with the given reason
    Fail(String),
    /// The run stopped early with the given reason
    Abort(String),
}

impl TaskEntryEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail(_) => "fail",
            Self::Abort(_) => "abort",
        }
    }

    /// Extract the reason if this event ends a run unsuccessfully
    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Fail(reason) | Self::Abort(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn fail_with_error(error: impl Into<String>) -> Self {
        Self::Fail(error.into())
    }

    pub fn abort_with_reason(reason: impl Into<String>) -> Self {
        Self::Abort(reason.into())
    }
}
