//! # Task Dispatcher
//!
//! The three instructor-facing operations. Each one only picks an update
//! function and a candidate predicate, then hands the run to the
//! [`BatchUpdateEngine`].
//!
//! | Task kind | Update | Predicate |
//! |---|---|---|
//! | `rescore_problem` | `Rescore` | attempt done |
//! | `reset_problem_attempts` | `ResetAttempts` | none |
//! | `delete_problem_state` | `DeleteState` | none |
//!
//! All three honor the optional `student` key of the task input.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;

use crate::constants::task_types;
use crate::context::SharedArgs;
use crate::engine::{BatchUpdateEngine, RunSummary, UpdateRequest};
use crate::error::{InstructorTaskError, Result};
use crate::models::TaskInput;
use crate::records::RecordPredicate;
use crate::update::UpdateFunction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    RescoreProblem,
    ResetProblemAttempts,
    DeleteProblemState,
}

impl TaskKind {
    pub const ALL: [TaskKind; 3] = [
        Self::RescoreProblem,
        Self::ResetProblemAttempts,
        Self::DeleteProblemState,
    ];

    /// Task type name stored on the entry.
    pub fn task_type(&self) -> &'static str {
        match self {
            Self::RescoreProblem => task_types::RESCORE_PROBLEM,
            Self::ResetProblemAttempts => task_types::RESET_PROBLEM_ATTEMPTS,
            Self::DeleteProblemState => task_types::DELETE_PROBLEM_STATE,
        }
    }

    pub fn update_function(&self) -> UpdateFunction {
        match self {
            Self::RescoreProblem => UpdateFunction::Rescore,
            Self::ResetProblemAttempts => UpdateFunction::ResetAttempts,
            Self::DeleteProblemState => UpdateFunction::DeleteState,
        }
    }

    pub fn action_name(&self) -> &'static str {
        self.update_function().action_name()
    }

    pub fn predicate(&self) -> Option<RecordPredicate> {
        match self {
            Self::RescoreProblem => Some(RecordPredicate::AttemptDone),
            Self::ResetProblemAttempts | Self::DeleteProblemState => None,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.task_type())
    }
}

impl FromStr for TaskKind {
    type Err = InstructorTaskError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.task_type() == s)
            .ok_or_else(|| InstructorTaskError::Validation(format!("Unknown task type: {s}")))
    }
}

#[derive(Debug, Clone)]
pub struct TaskDispatcher {
    engine: Arc<BatchUpdateEngine>,
}

impl TaskDispatcher {
    pub fn new(engine: Arc<BatchUpdateEngine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<BatchUpdateEngine> {
        &self.engine
    }

    /// Re-grade every completed submission of the problem.
    pub async fn rescore_problem(
        &self,
        entry_id: Uuid,
        course_id: &str,
        task_input: &Value,
        shared_args: SharedArgs,
    ) -> Result<RunSummary> {
        self.dispatch(
            TaskKind::RescoreProblem,
            entry_id,
            course_id,
            task_input,
            shared_args,
        )
        .await
    }

    /// Zero the attempt count of every learner's record for the problem.
    pub async fn reset_problem_attempts(
        &self,
        entry_id: Uuid,
        course_id: &str,
        task_input: &Value,
        shared_args: SharedArgs,
    ) -> Result<RunSummary> {
        self.dispatch(
            TaskKind::ResetProblemAttempts,
            entry_id,
            course_id,
            task_input,
            shared_args,
        )
        .await
    }

    /// Delete every learner's record for the problem.
    pub async fn delete_problem_state(
        &self,
        entry_id: Uuid,
        course_id: &str,
        task_input: &Value,
        shared_args: SharedArgs,
    ) -> Result<RunSummary> {
        self.dispatch(
            TaskKind::DeleteProblemState,
            entry_id,
            course_id,
            task_input,
            shared_args,
        )
        .await
    }

    /// Route a queued entry by kind.
    #[instrument(skip(self, task_input, shared_args), fields(task_type = kind.task_type()))]
    pub async fn dispatch(
        &self,
        kind: TaskKind,
        entry_id: Uuid,
        course_id: &str,
        task_input: &Value,
        shared_args: SharedArgs,
    ) -> Result<RunSummary> {
        let input = match TaskInput::from_value(task_input) {
            Ok(input) => input,
            Err(e) => return self.engine.reject(entry_id, kind.action_name(), e).await,
        };

        let request = UpdateRequest::new(entry_id, course_id, input, kind.update_function())
            .with_predicate(kind.predicate())
            .with_shared_args(shared_args);

        self.engine.run(request).await
    }
}
