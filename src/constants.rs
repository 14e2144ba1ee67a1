//! # System Constants
//!
//! Names and defaults shared by the dispatcher, the engine and the
//! configuration layer.

/// Canonical task type names, as stored on the task entry.
pub mod task_types {
    pub const RESCORE_PROBLEM: &str = "rescore_problem";
    pub const RESET_PROBLEM_ATTEMPTS: &str = "reset_problem_attempts";
    pub const DELETE_PROBLEM_STATE: &str = "delete_problem_state";
}

/// Past-tense action labels reported in run summaries.
pub mod actions {
    pub const RESCORED: &str = "rescored";
    pub const RESET: &str = "reset";
    pub const DELETED: &str = "deleted";
}

/// Keys of the task input mapping handed over by the queue layer.
pub mod task_input_keys {
    pub const PROBLEM_URL: &str = "problem_url";
    pub const STUDENT: &str = "student";
}

/// Engine defaults. Each is overridable through `EngineConfig`.
pub mod defaults {
    pub const CHECKPOINT_INTERVAL: u64 = 10;
    pub const PAGE_SIZE: usize = 500;
    pub const MAX_CONCURRENCY: usize = 1;
    pub const RECORD_TIMEOUT_MS: u64 = 30_000;
    pub const CHECKPOINT_RETRY_LIMIT: u32 = 3;
    pub const CHECKPOINT_BACKOFF_BASE_MS: u64 = 100;
    pub const MAX_DB_CONNECTIONS: u32 = 10;
}
