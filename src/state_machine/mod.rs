// State machine module for task entry lifecycle
//
// A task entry moves through a small persisted lifecycle (queued, running,
// succeeded, failed, aborted) while the engine moves through its own in-memory
// run phases. Transitions are resolved here and persisted through the
// progress tracker.

pub mod entry_state_machine;
pub mod errors;
pub mod events;
pub mod states;

// Re-export main types for convenient access
pub use entry_state_machine::{determine_target_state, EntryStateMachine};
pub use errors::{StateMachineError, StateMachineResult};
pub use events::TaskEntryEvent;
pub use states::{RunPhase, TaskEntryState};
