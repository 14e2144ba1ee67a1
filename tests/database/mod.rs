//! Database integration tests
//!
//! SQL behind the progress tracker and the submission source: compare-and-set
//! status writes, checkpoint round trips and keyset paging.

mod progress_tracker;
mod submission_source;
