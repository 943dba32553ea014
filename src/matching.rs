//! Merge operators produced by the three partition strategies.
//!
//! A [`MergeOperator`] is built once from a metric tensor and then applied to
//! any number of value tensors sharing the metric's batch and token counts.
//! Every application reuses exactly the index sets computed at construction,
//! so features, sizes and provenance matrices merged through the same operator
//! stay aligned.
//!
//! ```
//! use tome::{build_bipartite, MergeMode, Tensor};
//!
//! # fn main() -> tome::Result<()> {
//! let metric = Tensor::from_nested(vec![vec![
//!     vec![1.0, 0.0],
//!     vec![1.0, 0.0],
//!     vec![0.0, 1.0],
//!     vec![0.0, 1.0],
//! ]])?;
//! let op = build_bipartite(&metric, 1, false, false);
//! let merged = op.merge(&metric, MergeMode::Mean)?;
//! assert_eq!(merged.tokens(), 3);
//! let restored = op.unmerge(&merged)?;
//! assert_eq!(restored.tokens(), 4);
//! # Ok(())
//! # }
//! ```

mod bipartite;
mod kary;
mod random;

use rayon::prelude::*;

pub use bipartite::{build_bipartite, BipartiteMatch};
pub use kary::{build_kary, KaryMatch};
pub use random::{build_random, build_random_with_rng, RandomMatch};

use crate::error::Result;
use crate::reduce::MergeMode;
use crate::span::{timed, Stage};
use crate::tensor::Tensor;

/// Immutable merge/unmerge pair bound to the index sets of one token sequence.
#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOperator {
    /// No tokens are merged; both directions return their input unchanged.
    Identity,
    /// Even/odd split with top-`r` selection.
    Bipartite(BipartiteMatch),
    /// Groups of `k` tokens, every non-final member merged away.
    Kary(KaryMatch),
    /// Random split, `r` randomly chosen tokens merged away.
    Random(RandomMatch),
}

impl MergeOperator {
    /// Folds the selected source tokens of `x` into their destinations.
    pub fn merge(&self, x: &Tensor, mode: MergeMode) -> Result<Tensor> {
        timed(Stage::Merge, || match self {
            MergeOperator::Identity => Ok(x.clone()),
            MergeOperator::Bipartite(m) => m.merge(x, mode),
            MergeOperator::Kary(m) => m.merge(x, mode),
            MergeOperator::Random(m) => m.merge(x, mode),
        })
    }

    /// Expands a merged tensor back to the pre-merge token count.
    ///
    /// Merged tokens receive a copy of the destination they were folded into;
    /// their original distinct values are not recoverable.
    pub fn unmerge(&self, x: &Tensor) -> Result<Tensor> {
        timed(Stage::Unmerge, || match self {
            MergeOperator::Identity => Ok(x.clone()),
            MergeOperator::Bipartite(m) => m.unmerge(x),
            MergeOperator::Kary(m) => m.unmerge(x),
            MergeOperator::Random(m) => m.unmerge(x),
        })
    }

    /// Returns `true` for the no-op operator.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        matches!(self, MergeOperator::Identity)
    }

    /// Token count `merge` produces, or `None` for the identity operator.
    #[must_use]
    pub fn output_tokens(&self) -> Option<usize> {
        match self {
            MergeOperator::Identity => None,
            MergeOperator::Bipartite(m) => Some(m.output_tokens()),
            MergeOperator::Kary(m) => Some(m.output_tokens()),
            MergeOperator::Random(m) => Some(m.output_tokens()),
        }
    }

    /// Short label naming the strategy that built the operator.
    #[must_use]
    pub fn strategy_name(&self) -> &'static str {
        match self {
            MergeOperator::Identity => "identity",
            MergeOperator::Bipartite(_) => "bipartite",
            MergeOperator::Kary(_) => "kary",
            MergeOperator::Random(_) => "random",
        }
    }
}

/// Copies the listed rows of batch element `b` into one contiguous block.
fn gather_rows<I>(x: &Tensor, b: usize, rows: I) -> Vec<f32>
where
    I: IntoIterator<Item = usize>,
{
    let mut out = Vec::new();
    for t in rows {
        out.extend_from_slice(x.row(b, t));
    }
    out
}

/// Builds each batch element's rows in parallel and stacks them into one tensor.
fn assemble<F>(batch: usize, tokens: usize, channels: usize, build: F) -> Result<Tensor>
where
    F: Fn(usize) -> Vec<f32> + Sync + Send,
{
    let blocks: Vec<Vec<f32>> = (0..batch).into_par_iter().map(build).collect();
    Tensor::new([batch, tokens, channels], blocks.concat())
}
