//! # Progress Tracking
//!
//! Durable task-entry status and counters. The engine reports progress into
//! a [`ProgressTracker`] at bounded checkpoints and reads the entry's
//! cooperative cancel flag back in the same round trip.
//!
//! Writes that fail transiently are retried with exponential backoff through
//! [`with_retry`]; a checkpoint that still fails after the configured number
//! of retries aborts the run.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{NewTaskEntry, TaskEntry, TaskProgress};
use crate::state_machine::TaskEntryState;

pub use memory::InMemoryProgressTracker;
pub use postgres::PgProgressTracker;

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("Task entry {entry_id} not found")]
    EntryNotFound { entry_id: Uuid },

    #[error("Concurrent modification of task entry {entry_id}: expected {expected}, found {actual}")]
    ConcurrentModification {
        entry_id: Uuid,
        expected: String,
        actual: String,
    },

    #[error("Task entry {entry_id} is {status}, not running")]
    NotRunning { entry_id: Uuid, status: String },

    #[error("Progress store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Invalid task entry data: {field}")]
    InvalidData { field: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ProgressError {
    /// Whether retrying the same write could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Database(_))
    }
}

pub type ProgressResult<T> = Result<T, ProgressError>;

/// A status change together with the counters to store alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryTransition {
    pub from: TaskEntryState,
    pub to: TaskEntryState,
    pub progress: TaskProgress,
    /// Highest record id `progress` accounts for; always replaces the stored cursor.
    pub last_record_id: Option<i64>,
    /// Replaces the stored total when set.
    pub total: Option<u64>,
    /// Replaces the stored output when set. Entering `Running` clears it.
    pub task_output: Option<String>,
}

/// What a checkpoint write reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckpointAck {
    pub cancel_requested: bool,
}

#[async_trait]
pub trait ProgressTracker: Send + Sync {
    /// Create an entry in `Queued`. Used by the request layer.
    async fn create_entry(&self, new_entry: NewTaskEntry) -> ProgressResult<TaskEntry>;

    async fn load_entry(&self, entry_id: Uuid) -> ProgressResult<TaskEntry>;

    /// Compare-and-set the status from `transition.from` to `transition.to`.
    async fn persist_transition(
        &self,
        entry_id: Uuid,
        transition: &EntryTransition,
    ) -> ProgressResult<()>;

    /// Store counters of a running entry together with the id of the last
    /// record they account for; returns its cancel flag.
    async fn checkpoint(
        &self,
        entry_id: Uuid,
        progress: &TaskProgress,
        last_record_id: Option<i64>,
    ) -> ProgressResult<CheckpointAck>;

    /// Set the cooperative cancel flag.
    async fn request_cancel(&self, entry_id: Uuid) -> ProgressResult<()>;
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry - 1)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

/// Run `op` until it succeeds, fails permanently, or retries run out.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    operation: &str,
    entry_id: Uuid,
    mut op: F,
) -> ProgressResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProgressResult<T>>,
{
    let mut retries = 0;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && retries < policy.max_retries => {
                retries += 1;
                let delay = policy.delay_for(retries);
                tracing::warn!(
                    entry_id = %entry_id,
                    operation = operation,
                    retry = retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying progress write"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
