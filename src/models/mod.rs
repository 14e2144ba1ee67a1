pub mod submission;
pub mod task_entry;

// Re-export core models for easy access
pub use submission::{LearnerId, SubmissionRecord};
pub use task_entry::{NewTaskEntry, TaskEntry, TaskInput, TaskProgress};
