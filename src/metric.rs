//! Similarity metric helpers: unit-norm scaling and cosine scoring.

use crate::tensor::Tensor;

/// Scales every token vector to unit L2 norm so dot products equal cosine similarity.
///
/// Zero-norm vectors are not special-cased: they become `NaN` and propagate
/// through any downstream scoring.
pub fn normalize(metric: &Tensor) -> Tensor {
    let mut out = metric.clone();
    for b in 0..metric.batch() {
        for t in 0..metric.tokens() {
            let row = out.row_mut(b, t);
            let norm = row.iter().map(|v| v * v).sum::<f32>().sqrt();
            for v in row.iter_mut() {
                *v /= norm;
            }
        }
    }
    out
}

/// Dot product of two equally sized rows.
#[must_use]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Scores every `src` token against every `dst` token of batch element `b`.
///
/// Returns a row-major `src.len() × dst.len()` matrix. With a normalised
/// metric the scores are cosine similarities.
pub(crate) fn similarity(metric: &Tensor, b: usize, src: &[usize], dst: &[usize]) -> Vec<f32> {
    let mut scores = Vec::with_capacity(src.len() * dst.len());
    for &i in src {
        let a = metric.row(b, i);
        scores.extend(dst.iter().map(|&j| dot(a, metric.row(b, j))));
    }
    scores
}

/// Row-wise maximum of a row-major matrix with `cols` columns.
///
/// Returns `(node_max, node_idx)`. The first column wins ties and a `NaN`
/// anywhere in a row makes that row's maximum `NaN`. A row masked entirely
/// to `-inf` yields `(-inf, 0)`, and `cols == 0` yields two empty vectors.
pub(crate) fn row_max(scores: &[f32], cols: usize) -> (Vec<f32>, Vec<usize>) {
    if cols == 0 {
        return (Vec::new(), Vec::new());
    }
    scores
        .chunks(cols)
        .map(|row| {
            let mut best = f32::NEG_INFINITY;
            let mut best_idx = 0usize;
            for (j, &value) in row.iter().enumerate() {
                if best.is_nan() {
                    break;
                }
                if value > best || value.is_nan() {
                    best = value;
                    best_idx = j;
                }
            }
            (best, best_idx)
        })
        .unzip()
}
