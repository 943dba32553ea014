//! Size-weighted merging and provenance tracking on top of a [`MergeOperator`].

use crate::error::Result;
use crate::matching::MergeOperator;
use crate::reduce::MergeMode;
use crate::tensor::Tensor;

/// Merges `x` as a running weighted mean, weighting each token by its size.
///
/// `size` is the `batch × tokens × 1` count of original tokens each current
/// token already stands for; `None` starts every token at one. Returns the
/// merged values and the merged sizes. Threading the returned size into the
/// next call keeps the average exact across any number of merges.
pub fn merge_wavg(
    op: &MergeOperator,
    x: &Tensor,
    size: Option<&Tensor>,
) -> Result<(Tensor, Tensor)> {
    let ones;
    let size = match size {
        Some(size) => size,
        None => {
            ones = Tensor::ones(x.batch(), x.tokens(), 1);
            &ones
        }
    };

    let weighted = op.merge(&x.mul_rows(size)?, MergeMode::Sum)?;
    let size = op.merge(size, MergeMode::Sum)?;
    let x = weighted.div_rows(&size)?;
    Ok((x, size))
}

/// Folds the provenance matrix through `op` with a max reduction.
///
/// `source` is `batch × tokens × original_tokens`, row `t` marking the
/// original tokens that make up current token `t`. `None` starts from the
/// identity built from `x`'s shape. The merged row of a destination is the
/// union of its contributors' rows.
pub fn merge_source(op: &MergeOperator, x: &Tensor, source: Option<&Tensor>) -> Result<Tensor> {
    match source {
        Some(source) => op.merge(source, MergeMode::Amax),
        None => op.merge(&Tensor::identity(x.batch(), x.tokens()), MergeMode::Amax),
    }
}
