//! Random-split matching: `r` randomly chosen tokens merge into the rest.

use rand::Rng;
use rayon::prelude::*;

use crate::error::Result;
use crate::matching::{assemble, gather_rows, MergeOperator};
use crate::metric::{normalize, row_max, similarity};
use crate::reduce::{scatter_reduce, MergeMode};
use crate::span::{timed, Stage};
use crate::tensor::Tensor;

/// Index sets for one random merge.
///
/// Unlike the bipartite and k-ary variants the indices here are absolute
/// token positions, drawn independently for every batch element.
#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub struct RandomMatch {
    batch: usize,
    tokens: usize,
    r: usize,
    a_idx: Vec<Vec<usize>>,
    b_idx: Vec<Vec<usize>>,
    dst_idx: Vec<Vec<usize>>,
}

/// Builds a random merge removing `r` tokens, drawing from the thread-local RNG.
///
/// Every call draws fresh randomness. See [`build_random_with_rng`].
pub fn build_random(metric: &Tensor, r: usize) -> MergeOperator {
    build_random_with_rng(metric, r, &mut rand::thread_rng())
}

/// Builds a random merge removing `r` tokens using the supplied generator.
///
/// Each batch element gets its own uniformly random permutation of the token
/// positions (a sort by random keys); the first `r` positions merge into
/// their most similar token among the remaining `N - r`. `r` is clamped to
/// `N - 1` so at least one destination remains, and a clamped `r` of zero
/// yields [`MergeOperator::Identity`].
pub fn build_random_with_rng<R>(metric: &Tensor, r: usize, rng: &mut R) -> MergeOperator
where
    R: Rng + ?Sized,
{
    let tokens = metric.tokens();
    let r = r.min(tokens.saturating_sub(1));
    if r == 0 {
        return MergeOperator::Identity;
    }

    let (a_idx, b_idx): (Vec<Vec<usize>>, Vec<Vec<usize>>) = timed(Stage::AssignSets, || {
        (0..metric.batch())
            .map(|_| {
                let mut perm = random_permutation(tokens, rng);
                let rest = perm.split_off(r);
                (perm, rest)
            })
            .unzip()
    });

    let metric = timed(Stage::Normalize, || normalize(metric));
    let dst_idx = (0..metric.batch())
        .into_par_iter()
        .map(|b| {
            let scores = timed(Stage::SimilarityScores, || {
                similarity(&metric, b, &a_idx[b], &b_idx[b])
            });
            timed(Stage::ChooseTokens, || row_max(&scores, b_idx[b].len()).1)
        })
        .collect();

    MergeOperator::Random(RandomMatch {
        batch: metric.batch(),
        tokens,
        r,
        a_idx,
        b_idx,
        dst_idx,
    })
}

fn random_permutation<R>(tokens: usize, rng: &mut R) -> Vec<usize>
where
    R: Rng + ?Sized,
{
    let keys = permutation_keys(tokens, rng);
    let mut perm: Vec<usize> = (0..tokens).collect();
    perm.sort_by_key(|&i| keys[i]);
    perm
}

fn permutation_keys<R>(tokens: usize, rng: &mut R) -> Vec<u64>
where
    R: Rng + ?Sized,
{
    (0..tokens).map(|_| rng.gen()).collect()
}

impl RandomMatch {
    /// Token count `merge` produces.
    #[must_use]
    pub fn output_tokens(&self) -> usize {
        self.tokens - self.r
    }

    /// Positions merged away in batch element `b`.
    #[must_use]
    pub fn merged(&self, b: usize) -> &[usize] {
        &self.a_idx[b]
    }

    /// Positions kept as destinations in batch element `b`, in output order.
    #[must_use]
    pub fn kept(&self, b: usize) -> &[usize] {
        &self.b_idx[b]
    }

    /// Output slot each merged position was folded into.
    #[must_use]
    pub fn destinations(&self, b: usize) -> &[usize] {
        &self.dst_idx[b]
    }

    /// Folds the randomly selected tokens into their matched destinations.
    ///
    /// Output rows follow the random order of the destination set.
    pub fn merge(&self, x: &Tensor, mode: MergeMode) -> Result<Tensor> {
        x.expect_tokens(self.batch, self.tokens, "random merge")?;
        let channels = x.channels();
        assemble(self.batch, self.output_tokens(), channels, |b| {
            let src = gather_rows(x, b, self.a_idx[b].iter().copied());
            let mut dst = gather_rows(x, b, self.b_idx[b].iter().copied());
            scatter_reduce(&mut dst, channels, &self.dst_idx[b], &src, mode);
            dst
        })
    }

    /// Scatters destinations back to their positions and copies them into merged slots.
    pub fn unmerge(&self, x: &Tensor) -> Result<Tensor> {
        x.expect_tokens(self.batch, self.output_tokens(), "random unmerge")?;
        let channels = x.channels();
        assemble(self.batch, self.tokens, channels, |b| {
            let mut out = Tensor::zeros(1, self.tokens, channels);
            for (&pos, &slot) in self.a_idx[b].iter().zip(&self.dst_idx[b]) {
                out.row_mut(0, pos).copy_from_slice(x.row(b, slot));
            }
            for (slot, &pos) in self.b_idx[b].iter().enumerate() {
                out.row_mut(0, pos).copy_from_slice(x.row(b, slot));
            }
            out.into_data()
        })
    }
}
