//! # Batch Update Engine
//!
//! Applies one [`UpdateFunction`] to every candidate submission record of a
//! problem and reports progress into the task entry.
//!
//! ## Run Phases
//!
//! ```text
//! Initializing ──► Running ──► Completed
//!      │              │
//!      └──────────────┴──────► Aborted
//! ```
//!
//! - **Initializing**: validate the task input, resolve the optional learner,
//!   count the population and claim the entry (`Start`). An entry that is
//!   still `Running` was left behind by a crashed worker: its stored counters
//!   are kept and the scan resumes after its last checkpointed record.
//! - **Running**: stream candidates through the record filter, build a
//!   context and apply the update per record, checkpoint every
//!   `checkpoint_interval` records and poll the cancel flag in the same write.
//!   Each checkpoint stores the highest record id of the chunks processed so
//!   far, which is the resume cursor.
//! - **Completed**: the candidates are exhausted; the entry becomes
//!   `Succeeded`, or `Failed` when the failure tolerance is exceeded.
//! - **Aborted**: cancellation, a checkpoint that failed after retries, or a
//!   record source that stopped enumerating. Partial counters are kept.
//!
//! ## Failure Isolation
//!
//! Everything that can go wrong with one record (construction error, update
//! error, panic, timeout) becomes [`Outcome::Failed`] and the batch moves on.
//! Only input validation errors surface as `Err` from [`BatchUpdateEngine::run`].

mod summary;

pub use summary::{AbortReason, RunSummary};

use futures::future::join_all;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use serde_json::json;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::context::{ContextError, ExecutionContextFactory, SharedArgs};
use crate::error::{InstructorTaskError, Result};
use crate::logging::{log_error, log_record_operation, log_task_operation};
use crate::models::{SubmissionRecord, TaskEntry, TaskInput, TaskProgress};
use crate::progress::{with_retry, CheckpointAck, ProgressResult, ProgressTracker};
use crate::records::{
    RecordFilter, RecordPredicate, RecordQuery, RecordResult, SubmissionSource,
};
use crate::state_machine::{
    determine_target_state, EntryStateMachine, RunPhase, TaskEntryEvent, TaskEntryState,
};
use crate::update::{Outcome, UpdateFunction};

/// One invocation of the engine, as handed over by the dispatcher.
#[derive(Debug, Clone)]
pub struct UpdateRequest {
    pub entry_id: Uuid,
    pub course_id: String,
    pub input: TaskInput,
    pub update: UpdateFunction,
    /// Extra narrowing on top of the update function's own predicate
    pub predicate: Option<RecordPredicate>,
    /// Forwarded unchanged to every context build in the run
    pub shared_args: SharedArgs,
}

impl UpdateRequest {
    pub fn new(
        entry_id: Uuid,
        course_id: impl Into<String>,
        input: TaskInput,
        update: UpdateFunction,
    ) -> Self {
        Self {
            entry_id,
            course_id: course_id.into(),
            input,
            update,
            predicate: None,
            shared_args: SharedArgs::default(),
        }
    }

    /// Narrow candidates further. The update function's own predicate
    /// always applies as well.
    pub fn with_predicate(mut self, predicate: Option<RecordPredicate>) -> Self {
        self.predicate = predicate;
        self
    }

    /// Every predicate a candidate must satisfy.
    pub fn predicates(&self) -> Vec<RecordPredicate> {
        let mut predicates: Vec<RecordPredicate> =
            self.update.default_predicate().into_iter().collect();
        if let Some(extra) = self.predicate {
            if !predicates.contains(&extra) {
                predicates.push(extra);
            }
        }
        predicates
    }

    pub fn with_shared_args(mut self, shared_args: SharedArgs) -> Self {
        self.shared_args = shared_args;
        self
    }
}

/// Check that a username or email is plausible before resolving it.
pub fn validate_learner_ident(ident: &str) -> Result<()> {
    if ident.is_empty() {
        return Err(InstructorTaskError::configuration(
            "student identifier is empty",
        ));
    }
    if ident.chars().any(char::is_whitespace) {
        return Err(InstructorTaskError::configuration(format!(
            "student identifier '{ident}' contains whitespace"
        )));
    }
    match ident.matches('@').count() {
        0 => Ok(()),
        1 => match ident.split_once('@') {
            Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
            _ => Err(InstructorTaskError::configuration(format!(
                "student identifier '{ident}' is not a valid email address"
            ))),
        },
        _ => Err(InstructorTaskError::configuration(format!(
            "student identifier '{ident}' contains more than one '@'"
        ))),
    }
}

/// Mutable bookkeeping for a single run.
struct Run<'a> {
    request: &'a UpdateRequest,
    phase: RunPhase,
    progress: TaskProgress,
    /// Highest id among fully processed records
    last_record_id: Option<i64>,
    total: Option<u64>,
    started: Instant,
}

impl<'a> Run<'a> {
    fn new(request: &'a UpdateRequest, started: Instant) -> Self {
        Self {
            request,
            phase: RunPhase::Initializing,
            progress: TaskProgress::default(),
            last_record_id: None,
            total: None,
            started,
        }
    }

    /// Continue from what a crashed worker last checkpointed.
    fn resume_from(&mut self, entry: &TaskEntry) {
        self.progress = entry.progress;
        self.last_record_id = entry.last_record_id;
    }

    fn advance(&mut self, next: RunPhase) {
        debug_assert!(
            self.phase.can_advance_to(next),
            "run phase {} cannot advance to {}",
            self.phase,
            next
        );
        debug!(
            entry_id = %self.request.entry_id,
            from = %self.phase,
            to = %next,
            "Run phase advanced"
        );
        self.phase = next;
    }

    fn record(&mut self, record: &SubmissionRecord, outcome: &Outcome) {
        self.progress.record(outcome);
        let action = self.request.update.action_name();
        match outcome {
            Outcome::Succeeded => debug!(
                entry_id = %self.request.entry_id,
                record_id = record.id,
                action = action,
                "Record updated"
            ),
            Outcome::Skipped(reason) => log_record_operation(
                self.request.entry_id,
                record.id,
                record.learner_id.0,
                action,
                "skipped",
                Some(reason.as_str()),
            ),
            Outcome::Failed(reason) => log_record_operation(
                self.request.entry_id,
                record.id,
                record.learner_id.0,
                action,
                "failed",
                Some(reason.as_str()),
            ),
        }
    }

    fn summary(
        &self,
        phase: RunPhase,
        status: TaskEntryState,
        abort_reason: Option<AbortReason>,
    ) -> RunSummary {
        RunSummary {
            entry_id: self.request.entry_id,
            action_name: self.request.update.action_name().to_string(),
            phase,
            status,
            progress: self.progress,
            total: self.total,
            duration_ms: self.started.elapsed().as_millis() as u64,
            abort_reason,
        }
    }
}

/// Orchestrates record filter, context factory, update function and
/// progress tracker for one task entry at a time.
pub struct BatchUpdateEngine {
    source: Arc<dyn SubmissionSource>,
    factory: Arc<dyn ExecutionContextFactory>,
    tracker: Arc<dyn ProgressTracker>,
    config: EngineConfig,
}

impl std::fmt::Debug for BatchUpdateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchUpdateEngine")
            .field("config", &self.config)
            .finish()
    }
}

impl BatchUpdateEngine {
    pub fn new(
        source: Arc<dyn SubmissionSource>,
        factory: Arc<dyn ExecutionContextFactory>,
        tracker: Arc<dyn ProgressTracker>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            source,
            factory,
            tracker,
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the update over every candidate of the request.
    ///
    /// Returns `Err` only when the request is rejected before any record is
    /// touched (bad input, unknown learner, unreadable entry). Every other
    /// ending, including aborts, is reported through the summary.
    #[instrument(skip(self, request), fields(
        entry_id = %request.entry_id,
        course_id = %request.course_id,
        action = request.update.action_name()
    ))]
    pub async fn run(&self, request: UpdateRequest) -> Result<RunSummary> {
        let started = Instant::now();
        let retry = self.config.checkpoint_retry_policy();
        let entry_id = request.entry_id;

        let entry = with_retry(retry, "load_entry", entry_id, || {
            self.tracker.load_entry(entry_id)
        })
        .await?;

        // Redelivery of a finished run must not touch records again
        if entry.status == TaskEntryState::Succeeded {
            info!(entry_id = %entry_id, "Task entry already succeeded, returning stored summary");
            return Ok(stored_summary(&entry, request.update));
        }

        let mut machine =
            EntryStateMachine::new(Arc::clone(&self.tracker), &entry).with_retry_policy(retry);
        let mut run = Run::new(&request, started);
        if entry.status == TaskEntryState::Running {
            run.resume_from(&entry);
            info!(
                entry_id = %entry_id,
                attempted = run.progress.attempted,
                last_record_id = ?run.last_record_id,
                "Resuming task entry from its last checkpoint"
            );
        }

        let query = match self.initialize(&request).await {
            Ok(query) => query,
            Err(e) => {
                self.record_rejection(&mut machine, request.update.action_name(), &e)
                    .await;
                return Err(e);
            }
        };

        info!(
            entry_id = %entry_id,
            problem_url = %query.problem_url,
            learner_id = ?query.learner_id,
            predicates = ?request.predicates(),
            after_id = ?run.last_record_id,
            "Starting batch update"
        );

        let filter = RecordFilter::new(Arc::clone(&self.source), self.config.page_size)
            .with_predicates(request.predicates());
        let counted = filter.count(&query).await;
        run.total = counted.as_ref().ok().copied();

        if let Err(e) = machine
            .transition(
                TaskEntryEvent::Start,
                run.progress,
                run.last_record_id,
                run.total,
                None,
            )
            .await
        {
            error!(entry_id = %entry_id, error = %e, "Could not claim task entry");
            run.advance(RunPhase::Aborted);
            return Ok(run.summary(
                RunPhase::Aborted,
                machine.current_state(),
                Some(AbortReason::EntryUpdateFailed {
                    message: e.to_string(),
                }),
            ));
        }
        log_task_operation(
            "start",
            entry_id,
            &request.course_id,
            request.update.action_name(),
            machine.current_state().as_str(),
            None,
        );

        let abort = if let Err(e) = counted {
            Some(AbortReason::EnumerationFailed {
                message: e.to_string(),
            })
        } else if entry.cancel_requested {
            Some(AbortReason::Cancelled)
        } else {
            run.advance(RunPhase::Running);
            let candidates = filter.select_after(query, run.last_record_id);
            self.process_candidates(&mut run, candidates).await
        };

        Ok(self.finish(&mut run, &mut machine, abort).await)
    }

    /// Validate the input and build the record query.
    async fn initialize(&self, request: &UpdateRequest) -> Result<RecordQuery> {
        let problem_url = request
            .input
            .problem_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or_else(|| InstructorTaskError::configuration("task input is missing problem_url"))?;

        let mut query = RecordQuery::new(request.course_id.as_str(), problem_url);

        if let Some(ident) = request.input.student.as_deref() {
            validate_learner_ident(ident)?;
            let learner_id = self
                .factory
                .resolve_learner(&request.course_id, ident)
                .await
                .map_err(|e| match e {
                    ContextError::LearnerNotFound { .. } => {
                        InstructorTaskError::configuration(e.to_string())
                    }
                    other => other.into(),
                })?;
            query = query.for_learner(learner_id);
        }

        Ok(query)
    }

    /// Stream candidates in chunks of `max_concurrency`, checkpointing as
    /// configured. Returns the abort reason if the pass stopped early.
    async fn process_candidates(
        &self,
        run: &mut Run<'_>,
        mut candidates: BoxStream<'static, RecordResult<SubmissionRecord>>,
    ) -> Option<AbortReason> {
        let request = run.request;
        let chunk_size = self.config.max_concurrency;
        let mut since_checkpoint = 0u64;

        loop {
            let mut chunk = Vec::with_capacity(chunk_size);
            let mut exhausted = false;
            let mut enumeration_error = None;

            while chunk.len() < chunk_size {
                match candidates.next().await {
                    Some(Ok(record)) => chunk.push(record),
                    Some(Err(e)) => {
                        enumeration_error = Some(e);
                        break;
                    }
                    None => {
                        exhausted = true;
                        break;
                    }
                }
            }

            let outcomes = join_all(
                chunk
                    .iter()
                    .map(|record| self.process_record(request, record)),
            )
            .await;
            for (record, outcome) in chunk.iter().zip(&outcomes) {
                run.record(record, outcome);
            }
            // The whole chunk is done, so its highest id is a safe cursor
            run.last_record_id = run.last_record_id.max(chunk.iter().map(|r| r.id).max());
            since_checkpoint += chunk.len() as u64;

            if let Some(e) = enumeration_error {
                warn!(entry_id = %request.entry_id, error = %e, "Record source failed mid-scan");
                return Some(AbortReason::EnumerationFailed {
                    message: e.to_string(),
                });
            }
            if exhausted {
                return None;
            }

            if since_checkpoint >= self.config.checkpoint_interval {
                since_checkpoint = 0;
                match self
                    .checkpoint(request.entry_id, run.progress, run.last_record_id)
                    .await
                {
                    Ok(ack) if ack.cancel_requested => {
                        info!(
                            entry_id = %request.entry_id,
                            attempted = run.progress.attempted,
                            "Cancellation observed"
                        );
                        return Some(AbortReason::Cancelled);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(entry_id = %request.entry_id, error = %e, "Checkpoint failed after retries");
                        return Some(AbortReason::CheckpointFailed {
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    /// Build a context and apply the update to one record.
    ///
    /// Never fails: errors, panics and timeouts all become `Outcome::Failed`.
    async fn process_record(&self, request: &UpdateRequest, record: &SubmissionRecord) -> Outcome {
        let update = request.update;
        let work = async {
            let mut context = match self.factory.build(record, &request.shared_args).await {
                Ok(context) => context,
                Err(e) => return Outcome::failed(format!("context construction failed: {e}")),
            };
            update.apply(&mut *context).await
        };

        match tokio::time::timeout(
            self.config.record_timeout(),
            AssertUnwindSafe(work).catch_unwind(),
        )
        .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(payload)) => Outcome::failed(format!(
                "update panicked: {}",
                panic_message(payload.as_ref())
            )),
            Err(_) => Outcome::failed(format!(
                "timed out after {} ms",
                self.config.record_timeout_ms
            )),
        }
    }

    async fn checkpoint(
        &self,
        entry_id: Uuid,
        progress: TaskProgress,
        last_record_id: Option<i64>,
    ) -> ProgressResult<CheckpointAck> {
        let ack = with_retry(
            self.config.checkpoint_retry_policy(),
            "checkpoint",
            entry_id,
            || self.tracker.checkpoint(entry_id, &progress, last_record_id),
        )
        .await?;

        debug!(
            entry_id = %entry_id,
            last_record_id = ?last_record_id,
            attempted = progress.attempted,
            succeeded = progress.succeeded,
            skipped = progress.skipped,
            failed = progress.failed,
            cancel_requested = ack.cancel_requested,
            "Progress checkpointed"
        );
        Ok(ack)
    }

    /// Persist the final transition with the summary as task output.
    async fn finish(
        &self,
        run: &mut Run<'_>,
        machine: &mut EntryStateMachine,
        abort: Option<AbortReason>,
    ) -> RunSummary {
        let (phase, event) = match &abort {
            Some(reason) => (
                RunPhase::Aborted,
                TaskEntryEvent::abort_with_reason(reason.to_string()),
            ),
            None if self.config.failure_tolerance.is_exceeded(&run.progress) => (
                RunPhase::Completed,
                TaskEntryEvent::fail_with_error(format!(
                    "{} of {} records failed",
                    run.progress.failed, run.progress.attempted
                )),
            ),
            None => (RunPhase::Completed, TaskEntryEvent::Complete),
        };

        let target = determine_target_state(machine.current_state(), &event)
            .unwrap_or_else(|_| machine.current_state());
        let summary = run.summary(phase, target, abort.clone());

        let summary = match machine
            .transition(
                event,
                run.progress,
                run.last_record_id,
                run.total,
                Some(summary.to_json()),
            )
            .await
        {
            Ok(_) => {
                run.advance(phase);
                summary
            }
            Err(e) => {
                error!(entry_id = %run.request.entry_id, error = %e, "Could not record run outcome");
                run.advance(RunPhase::Aborted);
                let reason = abort.unwrap_or(AbortReason::EntryUpdateFailed {
                    message: e.to_string(),
                });
                run.summary(RunPhase::Aborted, machine.current_state(), Some(reason))
            }
        };

        log_task_operation(
            "finish",
            summary.entry_id,
            &run.request.course_id,
            &summary.action_name,
            summary.status.as_str(),
            Some(summary.to_string().as_str()),
        );
        summary
    }

    /// Mark an entry failed because its request was rejected up front.
    async fn record_rejection(
        &self,
        machine: &mut EntryStateMachine,
        action_name: &str,
        error: &InstructorTaskError,
    ) {
        let message = error.to_string();
        log_error("batch_update_engine", action_name, &message, None);

        let output = json!({
            "action_name": action_name,
            "status": TaskEntryState::Failed.as_str(),
            "error": message,
        })
        .to_string();

        if let Err(e) = machine
            .transition(
                TaskEntryEvent::fail_with_error(message),
                TaskProgress::default(),
                None,
                None,
                Some(output),
            )
            .await
        {
            warn!(
                entry_id = %machine.entry_id(),
                error = %e,
                "Could not mark rejected task entry as failed"
            );
        }
    }

    /// Fail the entry for a request that could not even be parsed.
    ///
    /// Always returns `Err(error)`.
    pub async fn reject(
        &self,
        entry_id: Uuid,
        action_name: &str,
        error: InstructorTaskError,
    ) -> Result<RunSummary> {
        match self.tracker.load_entry(entry_id).await {
            Ok(entry) if entry.status != TaskEntryState::Succeeded => {
                let mut machine = EntryStateMachine::new(Arc::clone(&self.tracker), &entry);
                self.record_rejection(&mut machine, action_name, &error)
                    .await;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(entry_id = %entry_id, error = %e, "Could not load rejected task entry");
            }
        }
        Err(error)
    }
}

/// Summary of an entry that already succeeded.
fn stored_summary(entry: &TaskEntry, update: UpdateFunction) -> RunSummary {
    entry
        .task_output
        .as_deref()
        .and_then(|output| serde_json::from_str::<RunSummary>(output).ok())
        .unwrap_or_else(|| RunSummary {
            entry_id: entry.id,
            action_name: update.action_name().to_string(),
            phase: RunPhase::Completed,
            status: entry.status,
            progress: entry.progress,
            total: entry.total,
            duration_ms: 0,
            abort_reason: None,
        })
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
