//! Stage timing hooks routed through the `log` facade.
//!
//! Each phase of building and applying a merge operator runs inside [`timed`].
//! When the `tome::stage` target is enabled at `trace` level the elapsed time is
//! logged; otherwise the closure runs with no measurement overhead.  Callers
//! pick the backend by installing any `log` implementation.

use std::fmt;
use std::time::Instant;

use log::{log_enabled, trace, Level};

/// Log target used for stage timings.
pub const STAGE_TARGET: &str = "tome::stage";

/// Phases of a merge that are timed individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Unit-norm scaling of the metric tensor.
    Normalize,
    /// Splitting tokens into source and destination sets.
    AssignSets,
    /// Cosine similarity between the two sets.
    SimilarityScores,
    /// Ranking matches and choosing which tokens merge.
    ChooseTokens,
    /// Applying a merge operator to a value tensor.
    Merge,
    /// Applying an unmerge operator to a reduced tensor.
    Unmerge,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Stage::Normalize => "normalize",
            Stage::AssignSets => "assign_sets",
            Stage::SimilarityScores => "similarity_scores",
            Stage::ChooseTokens => "choose_tokens",
            Stage::Merge => "merge",
            Stage::Unmerge => "unmerge",
        };
        f.write_str(label)
    }
}

/// Runs `f`, logging its wall-clock duration under [`STAGE_TARGET`].
pub fn timed<T, F>(stage: Stage, f: F) -> T
where
    F: FnOnce() -> T,
{
    if !log_enabled!(target: STAGE_TARGET, Level::Trace) {
        return f();
    }
    let start = Instant::now();
    let out = f();
    trace!(target: STAGE_TARGET, "{stage} took {:.2?}", start.elapsed());
    out
}
