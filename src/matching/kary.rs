//! Grouped matching: every `k`-th token is a destination, the rest merge away.

use rayon::prelude::*;

use crate::error::Result;
use crate::matching::{assemble, gather_rows, MergeOperator};
use crate::metric::{normalize, row_max, similarity};
use crate::reduce::{scatter_reduce, MergeMode};
use crate::span::{timed, Stage};
use crate::tensor::Tensor;

/// Index sets for one k-ary merge.
///
/// Tokens are cut into `groups = N / k` groups of `k`; trailing tokens that do
/// not fill a group are dropped. The last member of each group is a
/// destination and the first `k - 1` members are sources, flattened across
/// groups in token order.
#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub struct KaryMatch {
    batch: usize,
    tokens: usize,
    k: usize,
    groups: usize,
    dst_idx: Vec<Vec<usize>>,
}

/// Builds a k-ary merge reducing `metric`'s token count to `N / k`.
///
/// `k <= 1` yields [`MergeOperator::Identity`]. A source may match the
/// destination of any group, not only its own. Tokens past the last full
/// group are discarded by `merge` and are not restored by `unmerge`.
pub fn build_kary(metric: &Tensor, k: usize) -> MergeOperator {
    if k <= 1 {
        return MergeOperator::Identity;
    }

    let tokens = metric.tokens();
    let groups = tokens / k;
    let metric = timed(Stage::Normalize, || normalize(metric));
    let (sources, destinations) = timed(Stage::AssignSets, || split_groups(groups, k));

    let dst_idx = (0..metric.batch())
        .into_par_iter()
        .map(|b| {
            let scores = timed(Stage::SimilarityScores, || {
                similarity(&metric, b, &sources, &destinations)
            });
            timed(Stage::ChooseTokens, || row_max(&scores, destinations.len()).1)
        })
        .collect();

    MergeOperator::Kary(KaryMatch {
        batch: metric.batch(),
        tokens,
        k,
        groups,
        dst_idx,
    })
}

/// Token positions of the flattened sources and of the per-group destinations.
fn split_groups(groups: usize, k: usize) -> (Vec<usize>, Vec<usize>) {
    let sources = (0..groups)
        .flat_map(|g| (0..k - 1).map(move |i| g * k + i))
        .collect();
    let destinations = (0..groups).map(|g| g * k + k - 1).collect();
    (sources, destinations)
}

impl KaryMatch {
    /// Token count `merge` produces: one per full group.
    #[must_use]
    pub fn output_tokens(&self) -> usize {
        self.groups
    }

    /// Destination group chosen by each flattened source in batch element `b`.
    #[must_use]
    pub fn destinations(&self, b: usize) -> &[usize] {
        &self.dst_idx[b]
    }

    /// Folds every source token into its matched group destination.
    pub fn merge(&self, x: &Tensor, mode: MergeMode) -> Result<Tensor> {
        x.expect_tokens(self.batch, self.tokens, "k-ary merge")?;
        let channels = x.channels();
        let (sources, destinations) = split_groups(self.groups, self.k);
        assemble(self.batch, self.groups, channels, |b| {
            let src = gather_rows(x, b, sources.iter().copied());
            let mut dst = gather_rows(x, b, destinations.iter().copied());
            scatter_reduce(&mut dst, channels, &self.dst_idx[b], &src, mode);
            dst
        })
    }

    /// Rebuilds `groups × k` tokens, copying each destination back to its sources.
    pub fn unmerge(&self, x: &Tensor) -> Result<Tensor> {
        x.expect_tokens(self.batch, self.groups, "k-ary unmerge")?;
        let channels = x.channels();
        let per_group = self.k - 1;
        assemble(self.batch, self.groups * self.k, channels, |b| {
            let mut out = Vec::with_capacity(self.groups * self.k * channels);
            for (g, members) in self.dst_idx[b].chunks(per_group).enumerate() {
                for &target in members {
                    out.extend_from_slice(x.row(b, target));
                }
                out.extend_from_slice(x.row(b, g));
            }
            out
        })
    }
}
