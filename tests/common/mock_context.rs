use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use instructor_task::context::{
    ContextError, ContextResult, DeleteResult, ExecutionContext, ExecutionContextFactory,
    RescoreResult, SharedArgs,
};
use instructor_task::models::{LearnerId, NewTaskEntry, SubmissionRecord, TaskEntry, TaskProgress};
use instructor_task::progress::{
    CheckpointAck, EntryTransition, InMemoryProgressTracker, ProgressError, ProgressResult,
    ProgressTracker,
};
use instructor_task::records::InMemorySubmissionStore;

/// Key of the shared argument carrying the expected answer for rescoring.
pub const ANSWER_KEY: &str = "answer_key";

/// Cancel an entry once a given number of contexts have been built
struct CancelHook {
    tracker: Arc<InMemoryProgressTracker>,
    entry_id: Uuid,
    after_builds: usize,
}

/// Context factory over an in-memory store with scripted per-record faults.
///
/// Simulates the content layer: state blobs carry `done`, `attempts`,
/// `student_answer` and `score`, and rescoring compares the answer against
/// the `answer_key` shared argument.
pub struct MockContextFactory {
    store: Arc<InMemorySubmissionStore>,
    learners: HashMap<String, LearnerId>,
    missing_content: HashSet<i64>,
    grading_errors: HashSet<i64>,
    not_rescorable: HashSet<i64>,
    panics: HashSet<i64>,
    hangs: HashSet<i64>,
    cancel_hook: Option<CancelHook>,
    builds: AtomicUsize,
    built_records: Mutex<Vec<i64>>,
    seen_args: Mutex<Vec<SharedArgs>>,
}

impl MockContextFactory {
    pub fn new(store: Arc<InMemorySubmissionStore>) -> Self {
        Self {
            store,
            learners: HashMap::new(),
            missing_content: HashSet::new(),
            grading_errors: HashSet::new(),
            not_rescorable: HashSet::new(),
            panics: HashSet::new(),
            hangs: HashSet::new(),
            cancel_hook: None,
            builds: AtomicUsize::new(0),
            built_records: Mutex::new(Vec::new()),
            seen_args: Mutex::new(Vec::new()),
        }
    }

    /// Make `ident` (username or email) resolve to `learner_id`.
    pub fn with_learner(mut self, ident: &str, learner_id: LearnerId) -> Self {
        self.learners.insert(ident.to_string(), learner_id);
        self
    }

    pub fn with_missing_content(mut self, record_id: i64) -> Self {
        self.missing_content.insert(record_id);
        self
    }

    pub fn with_grading_error(mut self, record_id: i64) -> Self {
        self.grading_errors.insert(record_id);
        self
    }

    pub fn with_not_rescorable(mut self, record_id: i64) -> Self {
        self.not_rescorable.insert(record_id);
        self
    }

    pub fn with_panic(mut self, record_id: i64) -> Self {
        self.panics.insert(record_id);
        self
    }

    pub fn with_hang(mut self, record_id: i64) -> Self {
        self.hangs.insert(record_id);
        self
    }

    pub fn cancel_after(
        mut self,
        tracker: Arc<InMemoryProgressTracker>,
        entry_id: Uuid,
        after_builds: usize,
    ) -> Self {
        self.cancel_hook = Some(CancelHook {
            tracker,
            entry_id,
            after_builds,
        });
        self
    }

    /// Record ids a context was requested for, in request order.
    pub fn built_records(&self) -> Vec<i64> {
        self.built_records.lock().clone()
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn seen_args(&self) -> Vec<SharedArgs> {
        self.seen_args.lock().clone()
    }
}

#[async_trait]
impl ExecutionContextFactory for MockContextFactory {
    async fn resolve_learner(&self, course_id: &str, ident: &str) -> ContextResult<LearnerId> {
        self.learners
            .get(ident)
            .copied()
            .ok_or_else(|| ContextError::LearnerNotFound {
                course_id: course_id.to_string(),
                ident: ident.to_string(),
            })
    }

    async fn build(
        &self,
        record: &SubmissionRecord,
        shared_args: &SharedArgs,
    ) -> ContextResult<Box<dyn ExecutionContext>> {
        let builds = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
        self.built_records.lock().push(record.id);
        self.seen_args.lock().push(shared_args.clone());

        if let Some(hook) = &self.cancel_hook {
            if builds == hook.after_builds {
                hook.tracker
                    .request_cancel(hook.entry_id)
                    .await
                    .map_err(|e| ContextError::Storage(e.to_string()))?;
            }
        }

        if self.panics.contains(&record.id) {
            panic!("content module crashed for record {}", record.id);
        }
        if self.hangs.contains(&record.id) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.missing_content.contains(&record.id) {
            return Err(ContextError::ContentNotFound {
                problem_url: record.problem_url.clone(),
            });
        }

        let state = record
            .state_json()
            .map_err(|e| ContextError::MalformedState {
                record_id: record.id,
                reason: e.to_string(),
            })?;

        Ok(Box::new(MockContext {
            store: Arc::clone(&self.store),
            record_id: record.id,
            learner_id: record.learner_id,
            state,
            answer_key: shared_args.get_str(ANSWER_KEY).map(str::to_string),
            grading_error: self.grading_errors.contains(&record.id),
            rescorable: !self.not_rescorable.contains(&record.id),
        }))
    }
}

pub struct MockContext {
    store: Arc<InMemorySubmissionStore>,
    record_id: i64,
    learner_id: LearnerId,
    state: Value,
    answer_key: Option<String>,
    grading_error: bool,
    rescorable: bool,
}

impl MockContext {
    fn save(&self) -> ContextResult<()> {
        self.store
            .update_state(self.record_id, &self.state)
            .map_err(|e| ContextError::Storage(e.to_string()))
    }
}

#[async_trait]
impl ExecutionContext for MockContext {
    fn record_id(&self) -> i64 {
        self.record_id
    }

    fn learner_id(&self) -> LearnerId {
        self.learner_id
    }

    async fn rescore(&mut self) -> ContextResult<RescoreResult> {
        if !self.rescorable {
            return Ok(RescoreResult::NotRescorable);
        }
        if self.grading_error {
            return Err(ContextError::Grading("grader rejected submission".into()));
        }
        let answer_key = self
            .answer_key
            .as_deref()
            .ok_or_else(|| ContextError::Grading("no answer key configured".into()))?;

        let correct = self.state.get("student_answer").and_then(Value::as_str) == Some(answer_key);
        let score = if correct { 1 } else { 0 };
        if self.state.get("score").and_then(Value::as_i64) == Some(score) {
            return Ok(RescoreResult::Unchanged);
        }
        self.state["score"] = Value::from(score);
        self.save()?;
        Ok(RescoreResult::Changed)
    }

    async fn reset_attempts(&mut self) -> ContextResult<()> {
        self.state["attempts"] = Value::from(0);
        self.save()
    }

    async fn delete_state(&mut self) -> ContextResult<DeleteResult> {
        Ok(if self.store.delete(self.record_id) {
            DeleteResult::Deleted
        } else {
            DeleteResult::AlreadyAbsent
        })
    }
}

/// Progress tracker whose checkpoints start failing after a number of calls.
pub struct FlakyTracker {
    inner: Arc<InMemoryProgressTracker>,
    healthy_checkpoints: usize,
    checkpoint_calls: AtomicUsize,
    outage_on_failure: bool,
    down: AtomicBool,
}

impl FlakyTracker {
    pub fn new(inner: Arc<InMemoryProgressTracker>, healthy_checkpoints: usize) -> Self {
        Self {
            inner,
            healthy_checkpoints,
            checkpoint_calls: AtomicUsize::new(0),
            outage_on_failure: false,
            down: AtomicBool::new(false),
        }
    }

    /// After the first failed checkpoint, status writes fail as well.
    ///
    /// The entry is left `Running` with its last good checkpoint, the same
    /// state a worker that died mid-run leaves behind.
    pub fn with_outage(mut self) -> Self {
        self.outage_on_failure = true;
        self
    }

    fn unavailable() -> ProgressError {
        ProgressError::Unavailable {
            reason: "connection refused".into(),
        }
    }

    pub fn checkpoint_calls(&self) -> usize {
        self.checkpoint_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProgressTracker for FlakyTracker {
    async fn create_entry(&self, new_entry: NewTaskEntry) -> ProgressResult<TaskEntry> {
        self.inner.create_entry(new_entry).await
    }

    async fn load_entry(&self, entry_id: Uuid) -> ProgressResult<TaskEntry> {
        self.inner.load_entry(entry_id).await
    }

    async fn persist_transition(
        &self,
        entry_id: Uuid,
        transition: &EntryTransition,
    ) -> ProgressResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        self.inner.persist_transition(entry_id, transition).await
    }

    async fn checkpoint(
        &self,
        entry_id: Uuid,
        progress: &TaskProgress,
        last_record_id: Option<i64>,
    ) -> ProgressResult<CheckpointAck> {
        let call = self.checkpoint_calls.fetch_add(1, Ordering::SeqCst);
        if call >= self.healthy_checkpoints {
            if self.outage_on_failure {
                self.down.store(true, Ordering::SeqCst);
            }
            return Err(Self::unavailable());
        }
        self.inner.checkpoint(entry_id, progress, last_record_id).await
    }

    async fn request_cancel(&self, entry_id: Uuid) -> ProgressResult<()> {
        self.inner.request_cancel(entry_id).await
    }
}
