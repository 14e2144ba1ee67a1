use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

use instructor_task::config::EngineConfig;
use instructor_task::context::{ExecutionContextFactory, SharedArgs};
use instructor_task::dispatcher::{TaskDispatcher, TaskKind};
use instructor_task::engine::BatchUpdateEngine;
use instructor_task::models::{LearnerId, NewTaskEntry, SubmissionRecord, TaskEntry};
use instructor_task::progress::{InMemoryProgressTracker, ProgressTracker};
use instructor_task::records::{InMemorySubmissionStore, SubmissionSource};

use super::mock_context::{MockContextFactory, ANSWER_KEY};

pub const COURSE: &str = "course-v1:Org+C1+2024";
pub const PROBLEM: &str = "block-v1:Org+C1+2024+type@problem+block@P1";
pub const OTHER_PROBLEM: &str = "block-v1:Org+C1+2024+type@problem+block@P2";
pub const CORRECT_ANSWER: &str = "42";

/// State of a checked attempt with the given answer and stored score.
pub fn completed_state(answer: &str, score: i64) -> Value {
    json!({
        "done": true,
        "attempts": 2,
        "student_answer": answer,
        "score": score,
    })
}

/// State of an attempt that was started but never checked.
pub fn incomplete_state() -> Value {
    json!({
        "done": false,
        "attempts": 1,
        "student_answer": null,
        "score": 0,
    })
}

pub fn rescore_args() -> SharedArgs {
    SharedArgs::from_value(json!({ ANSWER_KEY: CORRECT_ANSWER, "grader": "local" }))
}

pub fn problem_input() -> Value {
    json!({ "problem_url": PROBLEM })
}

pub fn learner_input(student: &str) -> Value {
    json!({ "problem_url": PROBLEM, "student": student })
}

/// Config with checkpoints after every record and millisecond retry backoff.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        checkpoint_interval: 1,
        page_size: 2,
        checkpoint_backoff_base_ms: 1,
        record_timeout_ms: 2_000,
        ..EngineConfig::default()
    }
}

/// In-memory store and tracker shared by a test.
pub struct TestEnvironment {
    pub store: Arc<InMemorySubmissionStore>,
    pub tracker: Arc<InMemoryProgressTracker>,
}

impl Default for TestEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemorySubmissionStore::new()),
            tracker: Arc::new(InMemoryProgressTracker::new()),
        }
    }

    pub fn add_record(&self, learner: i64, state: Value) -> SubmissionRecord {
        self.store
            .insert(COURSE, PROBLEM, LearnerId(learner), state)
    }

    /// Four learners on `PROBLEM`: three checked attempts (one wrong answer)
    /// and one unchecked attempt. Returns the records in id order.
    pub fn seed_c1_p1(&self) -> Vec<SubmissionRecord> {
        vec![
            self.add_record(1, completed_state(CORRECT_ANSWER, 0)),
            self.add_record(2, completed_state("41", 1)),
            self.add_record(3, completed_state(CORRECT_ANSWER, 1)),
            self.add_record(4, incomplete_state()),
        ]
    }

    /// Factory knowing learners 1-4 by username and learner 2 by email.
    pub fn factory(&self) -> MockContextFactory {
        MockContextFactory::new(Arc::clone(&self.store))
            .with_learner("alice", LearnerId(1))
            .with_learner("bob", LearnerId(2))
            .with_learner("bob@example.org", LearnerId(2))
            .with_learner("carol", LearnerId(3))
            .with_learner("dave", LearnerId(4))
    }

    pub async fn queued_entry(&self, kind: TaskKind, task_input: Value) -> Uuid {
        self.tracker
            .create_entry(NewTaskEntry::new(COURSE, kind.task_type(), task_input))
            .await
            .expect("entry should be created")
            .id
    }

    pub fn entry(&self, entry_id: Uuid) -> TaskEntry {
        self.tracker.entry(entry_id).expect("entry should exist")
    }

    pub fn engine(
        &self,
        factory: Arc<MockContextFactory>,
        config: EngineConfig,
    ) -> Arc<BatchUpdateEngine> {
        self.engine_with_tracker(
            factory,
            Arc::clone(&self.tracker) as Arc<dyn ProgressTracker>,
            config,
        )
    }

    pub fn engine_with_tracker(
        &self,
        factory: Arc<MockContextFactory>,
        tracker: Arc<dyn ProgressTracker>,
        config: EngineConfig,
    ) -> Arc<BatchUpdateEngine> {
        Arc::new(
            BatchUpdateEngine::new(
                Arc::clone(&self.store) as Arc<dyn SubmissionSource>,
                factory as Arc<dyn ExecutionContextFactory>,
                tracker,
                config,
            )
            .expect("test config should be valid"),
        )
    }

    pub fn dispatcher(&self, factory: Arc<MockContextFactory>) -> TaskDispatcher {
        TaskDispatcher::new(self.engine(factory, test_config()))
    }

    /// `(record id, state)` pairs for comparing store contents across runs.
    pub fn states(&self) -> Vec<(i64, Value)> {
        self.store
            .snapshot()
            .into_iter()
            .map(|record| {
                let state = record.state_json().expect("state should be JSON");
                (record.id, state)
            })
            .collect()
    }
}
