use proptest::prelude::*;

/// How one seeded record behaves during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordScript {
    Healthy,
    Incomplete,
    MissingContent,
    GradingError,
    NotRescorable,
}

impl RecordScript {
    /// Whether a rescore run counts this record at all.
    pub fn is_rescore_candidate(&self) -> bool {
        !matches!(self, Self::Incomplete)
    }
}

pub fn record_script_strategy() -> impl Strategy<Value = RecordScript> {
    prop_oneof![
        4 => Just(RecordScript::Healthy),
        2 => Just(RecordScript::Incomplete),
        1 => Just(RecordScript::MissingContent),
        1 => Just(RecordScript::GradingError),
        1 => Just(RecordScript::NotRescorable),
    ]
}

/// Populations from empty up to a few pages.
pub fn population_strategy() -> impl Strategy<Value = Vec<RecordScript>> {
    prop::collection::vec(record_script_strategy(), 0..40)
}

/// `(checkpoint_interval, page_size, max_concurrency)`
pub fn engine_shape_strategy() -> impl Strategy<Value = (u64, usize, usize)> {
    (1u64..8, 1usize..7, 1usize..4)
}
