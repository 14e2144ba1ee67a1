use thiserror::Error;

use crate::config::ConfigurationError;
use crate::context::ContextError;
use crate::progress::ProgressError;

/// Crate-level error type.
///
/// Only run-level failures surface through this type. Per-record failures are
/// folded into [`crate::update::Outcome::Failed`] by the engine and never
/// propagate here.
#[derive(Debug, Error)]
pub enum InstructorTaskError {
    /// Bad task input detected before any record is touched.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Config(#[from] ConfigurationError),

    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error(transparent)]
    Context(#[from] ContextError),
}

impl InstructorTaskError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether the queue layer should consider re-running the entry.
    ///
    /// Bad input will fail the same way on every attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Configuration(_) | Self::Validation(_) | Self::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, InstructorTaskError>;
