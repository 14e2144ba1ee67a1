#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Instructor Task Core
//!
//! Bulk, asynchronous state mutation over learner submission records.
//!
//! ## Overview
//!
//! Instructors rescore a problem, reset attempt counts, or delete learner
//! state across every learner in a course without blocking the request that
//! triggered it. The request layer creates a task entry and enqueues it; a
//! worker then calls into this crate, which streams the affected submission
//! records, applies the operation to each one, and keeps the task entry's
//! counters current so progress stays visible while the run is in flight.
//!
//! ## Module Organization
//!
//! - [`dispatcher`] - The three instructor operations and task kind routing
//! - [`engine`] - Batch update engine: run phases, checkpoints, cancellation
//! - [`records`] - Lazy, keyset-paged candidate streams
//! - [`context`] - Execution context capability surface
//! - [`update`] - The closed set of update functions and per-record outcomes
//! - [`progress`] - Task entry persistence, checkpoints and retry
//! - [`state_machine`] - Task entry lifecycle and run phases
//! - [`models`] - Task entries, submission records, task input
//! - [`config`] - Engine and database configuration
//! - [`database`] - Pool setup and migrations
//! - [`logging`] - Structured logging bootstrap
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use instructor_task::config::EngineConfig;
//! use instructor_task::context::{ExecutionContextFactory, SharedArgs};
//! use instructor_task::dispatcher::TaskDispatcher;
//! use instructor_task::engine::BatchUpdateEngine;
//! use instructor_task::progress::PgProgressTracker;
//! use instructor_task::records::PgSubmissionSource;
//! use serde_json::json;
//! use sqlx::PgPool;
//! use uuid::Uuid;
//!
//! # async fn example(
//! #     pool: PgPool,
//! #     factory: Arc<dyn ExecutionContextFactory>,
//! #     entry_id: Uuid,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = BatchUpdateEngine::new(
//!     Arc::new(PgSubmissionSource::new(pool.clone())),
//!     factory,
//!     Arc::new(PgProgressTracker::new(pool)),
//!     EngineConfig::default(),
//! )?;
//! let dispatcher = TaskDispatcher::new(Arc::new(engine));
//!
//! let summary = dispatcher
//!     .rescore_problem(
//!         entry_id,
//!         "course-v1:Org+C1+2024",
//!         &json!({"problem_url": "block-v1:Org+C1+2024+type@problem+block@P1"}),
//!         SharedArgs::default(),
//!     )
//!     .await?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod context;
pub mod database;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod logging;
pub mod models;
pub mod progress;
pub mod records;
pub mod state_machine;
pub mod update;

pub use config::{EngineConfig, FailureTolerance, InstructorTaskConfig};
pub use context::{ExecutionContext, ExecutionContextFactory, SharedArgs};
pub use dispatcher::{TaskDispatcher, TaskKind};
pub use engine::{AbortReason, BatchUpdateEngine, RunSummary, UpdateRequest};
pub use error::{InstructorTaskError, Result};
pub use models::{SubmissionRecord, TaskEntry, TaskInput, TaskProgress};
pub use progress::ProgressTracker;
pub use records::{RecordFilter, RecordPredicate, SubmissionSource};
pub use update::{Outcome, UpdateFunction};
