use thiserror::Error;

use crate::progress::ProgressError;

/// Error types for task entry state machine operations
#[derive(Error, Debug)]
pub enum StateMachineError {
    #[error("Invalid state transition from {from} on event {event}")]
    InvalidTransition { from: String, event: String },

    #[error("Persistence operation failed: {0}")]
    Persistence(#[from] ProgressError),
}

pub type StateMachineResult<T> = Result<T, StateMachineError>;
