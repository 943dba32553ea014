//! Balanced bipartite soft matching over an even/odd token split.

use rayon::prelude::*;

use crate::error::Result;
use crate::matching::{assemble, gather_rows, MergeOperator};
use crate::metric::{normalize, row_max, similarity};
use crate::reduce::{scatter_reduce, MergeMode};
use crate::span::{timed, Stage};
use crate::tensor::Tensor;

/// Index sets for one bipartite merge.
///
/// Set A holds the even token positions and set B the odd ones; all indices
/// stored here are offsets *within* their set, so A index `i` is token `2i`
/// and B index `j` is token `2j + 1`.
#[must_use]
#[derive(Debug, Clone, PartialEq)]
pub struct BipartiteMatch {
    batch: usize,
    tokens: usize,
    r: usize,
    distill_token: bool,
    unm_idx: Vec<Vec<usize>>,
    src_idx: Vec<Vec<usize>>,
    dst_idx: Vec<Vec<usize>>,
}

/// Builds a bipartite merge removing up to `r` tokens from `metric`.
///
/// `r` is clamped to half of the unprotected tokens; a clamped `r` of zero
/// yields [`MergeOperator::Identity`].
///
/// With `class_token` the class token must sit at position 0 and is never
/// merged away; it is also guaranteed to be the first token of the merged
/// output. With `distill_token` the distillation token must sit at position 1
/// and is never chosen as a merge destination, and it stays at output
/// position 1.
///
/// Matches are ranked by similarity in descending order with a stable sort:
/// when scores tie exactly, the lower A index is merged first.
pub fn build_bipartite(
    metric: &Tensor,
    r: usize,
    class_token: bool,
    distill_token: bool,
) -> MergeOperator {
    let protected = usize::from(class_token) + usize::from(distill_token);
    let tokens = metric.tokens();
    let r = r.min(tokens.saturating_sub(protected) / 2);
    if r == 0 {
        return MergeOperator::Identity;
    }

    let metric = timed(Stage::Normalize, || normalize(metric));
    let (set_a, set_b) = timed(Stage::AssignSets, || split_parity(tokens));

    let matches: Vec<(Vec<usize>, Vec<usize>, Vec<usize>)> = (0..metric.batch())
        .into_par_iter()
        .map(|b| {
            let mut scores = timed(Stage::SimilarityScores, || {
                similarity(&metric, b, &set_a, &set_b)
            });
            timed(Stage::ChooseTokens, || {
                choose_tokens(&mut scores, set_b.len(), r, class_token, distill_token)
            })
        })
        .collect();

    let mut unm_idx = Vec::with_capacity(matches.len());
    let mut src_idx = Vec::with_capacity(matches.len());
    let mut dst_idx = Vec::with_capacity(matches.len());
    for (unm, src, dst) in matches {
        unm_idx.push(unm);
        src_idx.push(src);
        dst_idx.push(dst);
    }

    MergeOperator::Bipartite(BipartiteMatch {
        batch: metric.batch(),
        tokens,
        r,
        distill_token,
        unm_idx,
        src_idx,
        dst_idx,
    })
}

fn split_parity(tokens: usize) -> (Vec<usize>, Vec<usize>) {
    let even = (0..tokens).step_by(2).collect();
    let odd = (1..tokens).step_by(2).collect();
    (even, odd)
}

/// Ranks A rows by their best score and splits them into merged and kept sets.
///
/// Returns `(unm_idx, src_idx, dst_idx)` for one batch element.
fn choose_tokens(
    scores: &mut [f32],
    cols: usize,
    r: usize,
    class_token: bool,
    distill_token: bool,
) -> (Vec<usize>, Vec<usize>, Vec<usize>) {
    if class_token {
        scores[..cols].fill(f32::NEG_INFINITY);
    }
    if distill_token {
        for row in scores.chunks_mut(cols) {
            row[0] = f32::NEG_INFINITY;
        }
    }

    let (node_max, node_idx) = row_max(scores, cols);
    let mut edge_idx: Vec<usize> = (0..node_max.len()).collect();
    edge_idx.sort_by(|&i, &j| node_max[j].total_cmp(&node_max[i]));

    let mut unm_idx = edge_idx.split_off(r);
    let src_idx = edge_idx;
    let dst_idx = src_idx.iter().map(|&i| node_idx[i]).collect();
    if class_token {
        unm_idx.sort_unstable();
    }
    (unm_idx, src_idx, dst_idx)
}

impl BipartiteMatch {
    /// Token count `merge` produces.
    #[must_use]
    pub fn output_tokens(&self) -> usize {
        self.tokens - self.r
    }

    /// A-set indices kept unmerged in batch element `b`, in output order.
    #[must_use]
    pub fn unmerged(&self, b: usize) -> &[usize] {
        &self.unm_idx[b]
    }

    /// A-set indices merged away in batch element `b`, most similar first.
    #[must_use]
    pub fn merged(&self, b: usize) -> &[usize] {
        &self.src_idx[b]
    }

    /// B-set destination of each entry of [`BipartiteMatch::merged`].
    #[must_use]
    pub fn destinations(&self, b: usize) -> &[usize] {
        &self.dst_idx[b]
    }

    fn set_b_len(&self) -> usize {
        self.tokens / 2
    }

    fn unm_len(&self) -> usize {
        self.tokens.div_ceil(2) - self.r
    }

    /// Output position of the `i`-th kept A row.
    fn unm_slot(&self, i: usize) -> usize {
        if self.distill_token && i > 0 {
            i + 1
        } else {
            i
        }
    }

    /// Output position of the `j`-th B row.
    fn dst_slot(&self, j: usize) -> usize {
        if self.distill_token && j == 0 {
            1
        } else {
            self.unm_len() + j
        }
    }

    /// Folds the merged A rows of `x` into their B destinations.
    ///
    /// The output holds the kept A rows followed by the B rows. With a
    /// distillation token the first B row is moved to position 1, directly
    /// after the class token.
    pub fn merge(&self, x: &Tensor, mode: MergeMode) -> Result<Tensor> {
        x.expect_tokens(self.batch, self.tokens, "bipartite merge")?;
        let channels = x.channels();
        let set_b_len = self.set_b_len();
        assemble(self.batch, self.output_tokens(), channels, |b| {
            let unm = gather_rows(x, b, self.unm_idx[b].iter().map(|&i| 2 * i));
            let src = gather_rows(x, b, self.src_idx[b].iter().map(|&i| 2 * i));
            let mut dst = gather_rows(x, b, (0..set_b_len).map(|j| 2 * j + 1));
            scatter_reduce(&mut dst, channels, &self.dst_idx[b], &src, mode);

            if self.distill_token {
                let mut out = Vec::with_capacity(unm.len() + dst.len());
                out.extend_from_slice(&unm[..channels]);
                out.extend_from_slice(&dst[..channels]);
                out.extend_from_slice(&unm[channels..]);
                out.extend_from_slice(&dst[channels..]);
                out
            } else {
                let mut out = unm;
                out.extend(dst);
                out
            }
        })
    }

    /// Restores the pre-merge layout from a merged tensor.
    ///
    /// Kept rows return to their even positions, B rows to the odd positions,
    /// and every merged position receives a copy of its destination row.
    pub fn unmerge(&self, x: &Tensor) -> Result<Tensor> {
        x.expect_tokens(self.batch, self.output_tokens(), "bipartite unmerge")?;
        let channels = x.channels();
        let set_b_len = self.set_b_len();
        assemble(self.batch, self.tokens, channels, |b| {
            let mut out = Tensor::zeros(1, self.tokens, channels);
            for j in 0..set_b_len {
                out.row_mut(0, 2 * j + 1)
                    .copy_from_slice(x.row(b, self.dst_slot(j)));
            }
            for (i, &a) in self.unm_idx[b].iter().enumerate() {
                out.row_mut(0, 2 * a)
                    .copy_from_slice(x.row(b, self.unm_slot(i)));
            }
            for (&a, &j) in self.src_idx[b].iter().zip(&self.dst_idx[b]) {
                out.row_mut(0, 2 * a)
                    .copy_from_slice(x.row(b, self.dst_slot(j)));
            }
            out.into_data()
        })
    }
}
