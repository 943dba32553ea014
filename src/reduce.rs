//! Reduction modes and the scatter-with-reduction primitive used by every merge.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TomeError;

/// How source rows are folded into the destination row they matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    /// Add source rows onto the destination.
    Sum,
    /// Average the destination with every source row folded into it.
    #[default]
    Mean,
    /// Element-wise maximum of the destination and its source rows.
    Amax,
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MergeMode::Sum => "sum",
            MergeMode::Mean => "mean",
            MergeMode::Amax => "amax",
        };
        f.write_str(label)
    }
}

impl FromStr for MergeMode {
    type Err = TomeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "sum" => Ok(MergeMode::Sum),
            "mean" => Ok(MergeMode::Mean),
            "amax" | "max" => Ok(MergeMode::Amax),
            other => Err(TomeError::InvalidConfig(format!(
                "unknown merge mode {other:?} (expected sum, mean, or amax)"
            ))),
        }
    }
}

/// Folds `src` rows into the `dst` rows selected by `index`, in place.
///
/// `dst` and `src` are row-major blocks of `channels` values per row and
/// `index[i]` names the destination row receiving `src` row `i`. The
/// destination's own value takes part in the reduction, so a destination
/// receiving `m` rows under [`MergeMode::Mean`] ends up as the mean of `m + 1`
/// rows. Destinations that receive nothing are left untouched. All modes are
/// commutative, so the order in which rows arrive does not change the result
/// beyond floating point rounding of sums.
pub(crate) fn scatter_reduce(
    dst: &mut [f32],
    channels: usize,
    index: &[usize],
    src: &[f32],
    mode: MergeMode,
) {
    if channels == 0 {
        return;
    }
    debug_assert_eq!(src.len(), index.len() * channels);
    match mode {
        MergeMode::Sum => {
            for (&target, row) in index.iter().zip(src.chunks(channels)) {
                let out = &mut dst[target * channels..(target + 1) * channels];
                for (d, &s) in out.iter_mut().zip(row) {
                    *d += s;
                }
            }
        }
        MergeMode::Amax => {
            for (&target, row) in index.iter().zip(src.chunks(channels)) {
                let out = &mut dst[target * channels..(target + 1) * channels];
                for (d, &s) in out.iter_mut().zip(row) {
                    if s > *d || s.is_nan() {
                        *d = s;
                    }
                }
            }
        }
        MergeMode::Mean => {
            let rows = dst.len() / channels;
            let mut counts = vec![1u32; rows];
            for (&target, row) in index.iter().zip(src.chunks(channels)) {
                counts[target] += 1;
                let out = &mut dst[target * channels..(target + 1) * channels];
                for (d, &s) in out.iter_mut().zip(row) {
                    *d += s;
                }
            }
            for (row, &count) in dst.chunks_mut(channels).zip(&counts) {
                if count > 1 {
                    let denom = count as f32;
                    for v in row.iter_mut() {
                        *v /= denom;
                    }
                }
            }
        }
    }
}
