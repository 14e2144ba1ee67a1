//! In-memory progress tracker.
//!
//! Keeps every checkpoint written for an entry so callers can inspect how
//! counters evolved over a run.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use uuid::Uuid;

use super::{CheckpointAck, EntryTransition, ProgressError, ProgressResult, ProgressTracker};
use crate::models::{NewTaskEntry, TaskEntry, TaskProgress};
use crate::state_machine::TaskEntryState;

#[derive(Debug, Default)]
pub struct InMemoryProgressTracker {
    entries: DashMap<Uuid, TaskEntry>,
    checkpoints: DashMap<Uuid, Vec<TaskProgress>>,
}

impl InMemoryProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters in the order they were persisted, final write included.
    pub fn checkpoint_history(&self, entry_id: Uuid) -> Vec<TaskProgress> {
        self.checkpoints
            .get(&entry_id)
            .map(|history| history.clone())
            .unwrap_or_default()
    }

    /// Snapshot of an entry, if present.
    pub fn entry(&self, entry_id: Uuid) -> Option<TaskEntry> {
        self.entries.get(&entry_id).map(|entry| entry.clone())
    }

    fn record_checkpoint(&self, entry_id: Uuid, progress: TaskProgress) {
        self.checkpoints.entry(entry_id).or_default().push(progress);
    }
}

#[async_trait]
impl ProgressTracker for InMemoryProgressTracker {
    async fn create_entry(&self, new_entry: NewTaskEntry) -> ProgressResult<TaskEntry> {
        let now = Utc::now();
        let entry = TaskEntry {
            id: Uuid::new_v4(),
            course_id: new_entry.course_id,
            task_type: new_entry.task_type,
            task_input: new_entry.task_input,
            status: TaskEntryState::Queued,
            progress: TaskProgress::default(),
            total: None,
            task_output: None,
            last_record_id: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        };
        self.entries.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn load_entry(&self, entry_id: Uuid) -> ProgressResult<TaskEntry> {
        self.entry(entry_id)
            .ok_or(ProgressError::EntryNotFound { entry_id })
    }

    async fn persist_transition(
        &self,
        entry_id: Uuid,
        transition: &EntryTransition,
    ) -> ProgressResult<()> {
        {
            let mut entry = self
                .entries
                .get_mut(&entry_id)
                .ok_or(ProgressError::EntryNotFound { entry_id })?;

            if entry.status != transition.from {
                return Err(ProgressError::ConcurrentModification {
                    entry_id,
                    expected: transition.from.to_string(),
                    actual: entry.status.to_string(),
                });
            }

            entry.status = transition.to;
            entry.progress = transition.progress;
            entry.last_record_id = transition.last_record_id;
            if let Some(total) = transition.total {
                entry.total = Some(total);
            }
            if transition.to == TaskEntryState::Running {
                entry.task_output = None;
            } else if let Some(output) = &transition.task_output {
                entry.task_output = Some(output.clone());
            }
            entry.updated_at = Utc::now();
        }

        if transition.to != TaskEntryState::Running {
            self.record_checkpoint(entry_id, transition.progress);
        } else if transition.from != TaskEntryState::Running {
            // A fresh pass; a resumed one keeps counting from its history.
            self.checkpoints.remove(&entry_id);
        }
        Ok(())
    }

    async fn checkpoint(
        &self,
        entry_id: Uuid,
        progress: &TaskProgress,
        last_record_id: Option<i64>,
    ) -> ProgressResult<CheckpointAck> {
        let cancel_requested = {
            let mut entry = self
                .entries
                .get_mut(&entry_id)
                .ok_or(ProgressError::EntryNotFound { entry_id })?;

            if entry.status != TaskEntryState::Running {
                return Err(ProgressError::NotRunning {
                    entry_id,
                    status: entry.status.to_string(),
                });
            }

            entry.progress = *progress;
            entry.last_record_id = last_record_id;
            entry.updated_at = Utc::now();
            entry.cancel_requested
        };

        self.record_checkpoint(entry_id, *progress);
        Ok(CheckpointAck { cancel_requested })
    }

    async fn request_cancel(&self, entry_id: Uuid) -> ProgressResult<()> {
        let mut entry = self
            .entries
            .get_mut(&entry_id)
            .ok_or(ProgressError::EntryNotFound { entry_id })?;
        entry.cancel_requested = true;
        entry.updated_at = Utc::now();
        Ok(())
    }
}
