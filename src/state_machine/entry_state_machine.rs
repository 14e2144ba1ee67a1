use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::{
    errors::{StateMachineError, StateMachineResult},
    events::TaskEntryEvent,
    states::TaskEntryState,
};
use crate::models::{TaskEntry, TaskProgress};
use crate::progress::{with_retry, EntryTransition, ProgressTracker, RetryPolicy};

/// Resolve the state an event leads to from `current`.
pub fn determine_target_state(
    current: TaskEntryState,
    event: &TaskEntryEvent,
) -> StateMachineResult<TaskEntryState> {
    let target = match (current, event) {
        // Start transitions; Running -> Running is a redelivery after a worker crash
        (
            TaskEntryState::Queued
            | TaskEntryState::Running
            | TaskEntryState::Failed
            | TaskEntryState::Aborted,
            TaskEntryEvent::Start,
        ) => TaskEntryState::Running,

        // Complete transitions
        (TaskEntryState::Running, TaskEntryEvent::Complete) => TaskEntryState::Succeeded,

        // Failure transitions
        (
            TaskEntryState::Queued
            | TaskEntryState::Running
            | TaskEntryState::Failed
            | TaskEntryState::Aborted,
            TaskEntryEvent::Fail(_),
        ) => TaskEntryState::Failed,

        // Abort transitions
        (TaskEntryState::Queued | TaskEntryState::Running, TaskEntryEvent::Abort(_)) => {
            TaskEntryState::Aborted
        }

        // Invalid transitions
        (from_state, _) => {
            return Err(StateMachineError::InvalidTransition {
                from: from_state.to_string(),
                event: event.event_type().to_string(),
            })
        }
    };

    Ok(target)
}

/// Task entry state machine bound to one entry and its tracker
pub struct EntryStateMachine {
    tracker: Arc<dyn ProgressTracker>,
    entry_id: Uuid,
    current: TaskEntryState,
    retry: RetryPolicy,
}

impl EntryStateMachine {
    pub fn new(tracker: Arc<dyn ProgressTracker>, entry: &TaskEntry) -> Self {
        Self {
            tracker,
            entry_id: entry.id,
            current: entry.status,
            retry: RetryPolicy::none(),
        }
    }

    /// Retry transient persistence failures with this policy.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn current_state(&self) -> TaskEntryState {
        self.current
    }

    pub fn entry_id(&self) -> Uuid {
        self.entry_id
    }

    /// Resolve, persist and adopt the transition for `event`.
    ///
    /// `last_record_id` is the resume cursor stored alongside `progress`.
    pub async fn transition(
        &mut self,
        event: TaskEntryEvent,
        progress: TaskProgress,
        last_record_id: Option<i64>,
        total: Option<u64>,
        task_output: Option<String>,
    ) -> StateMachineResult<TaskEntryState> {
        let target = determine_target_state(self.current, &event)?;
        let transition = EntryTransition {
            from: self.current,
            to: target,
            progress,
            last_record_id,
            total,
            task_output,
        };

        let tracker = Arc::clone(&self.tracker);
        let entry_id = self.entry_id;
        with_retry(self.retry, event.event_type(), entry_id, || {
            tracker.persist_transition(entry_id, &transition)
        })
        .await?;

        debug!(
            entry_id = %entry_id,
            from = %self.current,
            to = %target,
            event = event.event_type(),
            "Task entry transitioned"
        );
        self.current = target;
        Ok(target)
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }
}
