//! Dense `batch × tokens × channels` tensors used as merge inputs and outputs.
//!
//! The layout is row-major with one contiguous row of `channels` values per
//! token, so every gather/scatter performed by the matching operators works on
//! whole rows.

use std::convert::TryFrom;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TomeError};

/// Dense three dimensional tensor of `f32` values shaped `[batch, tokens, channels]`.
#[must_use]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TensorRepr", into = "TensorRepr")]
pub struct Tensor {
    batch: usize,
    tokens: usize,
    channels: usize,
    data: Vec<f32>,
}

/// Wire representation: an explicit shape and the flat row-major data.
#[derive(Serialize, Deserialize)]
struct TensorRepr {
    shape: [usize; 3],
    data: Vec<f32>,
}

impl TryFrom<TensorRepr> for Tensor {
    type Error = TomeError;

    fn try_from(repr: TensorRepr) -> Result<Self> {
        Tensor::new(repr.shape, repr.data)
    }
}

impl From<Tensor> for TensorRepr {
    fn from(tensor: Tensor) -> Self {
        Self {
            shape: tensor.shape(),
            data: tensor.data,
        }
    }
}

impl Tensor {
    /// Creates a tensor from flat row-major data, validating its length against `shape`.
    pub fn new(shape: [usize; 3], data: Vec<f32>) -> Result<Self> {
        let [batch, tokens, channels] = shape;
        let expected = batch
            .checked_mul(tokens)
            .and_then(|n| n.checked_mul(channels))
            .ok_or_else(|| TomeError::Shape(format!("shape {shape:?} overflows usize")))?;
        if data.len() != expected {
            return Err(TomeError::Shape(format!(
                "shape {shape:?} requires {expected} values but {} were supplied",
                data.len()
            )));
        }
        Ok(Self {
            batch,
            tokens,
            channels,
            data,
        })
    }

    /// Creates a tensor filled with `value`.
    pub fn full(batch: usize, tokens: usize, channels: usize, value: f32) -> Self {
        Self {
            batch,
            tokens,
            channels,
            data: vec![value; batch * tokens * channels],
        }
    }

    /// Creates a zero-initialised tensor.
    pub fn zeros(batch: usize, tokens: usize, channels: usize) -> Self {
        Self::full(batch, tokens, channels, 0.0)
    }

    /// Creates a tensor of ones.
    pub fn ones(batch: usize, tokens: usize, channels: usize) -> Self {
        Self::full(batch, tokens, channels, 1.0)
    }

    /// Builds a `batch × tokens × tokens` stack of identity matrices.
    ///
    /// This is the initial provenance matrix: every token is composed of itself alone.
    pub fn identity(batch: usize, tokens: usize) -> Self {
        let mut out = Self::zeros(batch, tokens, tokens);
        for b in 0..batch {
            for t in 0..tokens {
                out.row_mut(b, t)[t] = 1.0;
            }
        }
        out
    }

    /// Builds a tensor from nested `[batch][token][channel]` vectors.
    ///
    /// Every batch element must hold the same number of tokens and every token
    /// the same number of channels.
    pub fn from_nested(rows: Vec<Vec<Vec<f32>>>) -> Result<Self> {
        let batch = rows.len();
        let tokens = rows.first().map_or(0, Vec::len);
        let channels = rows
            .first()
            .and_then(|tokens| tokens.first())
            .map_or(0, Vec::len);
        let mut data = Vec::with_capacity(batch * tokens * channels);
        for (b, sequence) in rows.into_iter().enumerate() {
            if sequence.len() != tokens {
                return Err(TomeError::Shape(format!(
                    "batch element {b} has {} tokens, expected {tokens}",
                    sequence.len()
                )));
            }
            for (t, row) in sequence.into_iter().enumerate() {
                if row.len() != channels {
                    return Err(TomeError::Shape(format!(
                        "token {t} of batch element {b} has {} channels, expected {channels}",
                        row.len()
                    )));
                }
                data.extend(row);
            }
        }
        Self::new([batch, tokens, channels], data)
    }

    /// Returns the `[batch, tokens, channels]` shape.
    #[must_use]
    pub fn shape(&self) -> [usize; 3] {
        [self.batch, self.tokens, self.channels]
    }

    /// Number of independent sequences.
    #[must_use]
    pub fn batch(&self) -> usize {
        self.batch
    }

    /// Number of tokens per sequence.
    #[must_use]
    pub fn tokens(&self) -> usize {
        self.tokens
    }

    /// Number of channels per token.
    #[must_use]
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Flat row-major view of the values.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Consumes the tensor, returning the flat row-major values.
    #[must_use]
    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    /// Returns the channel values of token `t` in batch element `b`.
    #[must_use]
    pub fn row(&self, b: usize, t: usize) -> &[f32] {
        let start = (b * self.tokens + t) * self.channels;
        &self.data[start..start + self.channels]
    }

    /// Mutable variant of [`Tensor::row`].
    pub fn row_mut(&mut self, b: usize, t: usize) -> &mut [f32] {
        let start = (b * self.tokens + t) * self.channels;
        &mut self.data[start..start + self.channels]
    }

    /// Single value accessor.
    #[must_use]
    pub fn get(&self, b: usize, t: usize, c: usize) -> f32 {
        self.row(b, t)[c]
    }

    /// Converts the tensor back into nested `[batch][token][channel]` vectors.
    #[must_use]
    pub fn to_nested(&self) -> Vec<Vec<Vec<f32>>> {
        (0..self.batch)
            .map(|b| (0..self.tokens).map(|t| self.row(b, t).to_vec()).collect())
            .collect()
    }

    /// Multiplies every row by the matching entry of a `batch × tokens × 1` weight tensor.
    pub fn mul_rows(&self, weights: &Tensor) -> Result<Self> {
        self.zip_rows(weights, "mul_rows", |v, w| v * w)
    }

    /// Divides every row by the matching entry of a `batch × tokens × 1` weight tensor.
    pub fn div_rows(&self, weights: &Tensor) -> Result<Self> {
        self.zip_rows(weights, "div_rows", |v, w| v / w)
    }

    /// Returns `true` when every value is within `tolerance` of `other`'s.
    #[must_use]
    pub fn approx_eq(&self, other: &Tensor, tolerance: f32) -> bool {
        self.shape() == other.shape()
            && self
                .data
                .iter()
                .zip(&other.data)
                .all(|(a, b)| (a - b).abs() <= tolerance || (a.is_nan() && b.is_nan()))
    }

    /// Checks that the tensor's leading two dimensions equal `batch × tokens`.
    pub(crate) fn expect_tokens(&self, batch: usize, tokens: usize, op: &str) -> Result<()> {
        if self.batch != batch || self.tokens != tokens {
            return Err(TomeError::Shape(format!(
                "{op} expects {batch}×{tokens}×C input, got {:?}",
                self.shape()
            )));
        }
        Ok(())
    }

    fn zip_rows<F>(&self, weights: &Tensor, op: &str, f: F) -> Result<Self>
    where
        F: Fn(f32, f32) -> f32,
    {
        weights.expect_tokens(self.batch, self.tokens, op)?;
        if weights.channels != 1 {
            return Err(TomeError::Shape(format!(
                "{op} expects a single weight channel, got {}",
                weights.channels
            )));
        }
        let channels = self.channels.max(1);
        let data = self
            .data
            .chunks(channels)
            .zip(&weights.data)
            .flat_map(|(row, &w)| {
                let f = &f;
                row.iter().map(move |&v| f(v, w))
            })
            .collect();
        Ok(Self {
            batch: self.batch,
            tokens: self.tokens,
            channels: self.channels,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_wrong_length() {
        let err = Tensor::new([1, 2, 3], vec![0.0; 5]).expect_err("length mismatch");
        assert!(matches!(err, TomeError::Shape(message) if message.contains("requires 6")));
    }

    #[test]
    fn from_nested_rejects_ragged_rows() {
        let err = Tensor::from_nested(vec![vec![vec![1.0, 2.0], vec![3.0]]])
            .expect_err("ragged channels");
        assert!(matches!(err, TomeError::Shape(_)));
    }

    #[test]
    fn identity_marks_diagonal() {
        let eye = Tensor::identity(2, 3);
        assert_eq!(eye.shape(), [2, 3, 3]);
        for b in 0..2 {
            for t in 0..3 {
                for c in 0..3 {
                    let expected = if t == c { 1.0 } else { 0.0 };
                    assert_eq!(eye.get(b, t, c), expected);
                }
            }
        }
    }

    #[test]
    fn row_weights_broadcast_over_channels() {
        let x = Tensor::from_nested(vec![vec![vec![1.0, 2.0], vec![3.0, 4.0]]]).unwrap();
        let w = Tensor::from_nested(vec![vec![vec![2.0], vec![0.5]]]).unwrap();
        let scaled = x.mul_rows(&w).unwrap();
        assert_eq!(scaled.data(), &[2.0, 4.0, 1.5, 2.0]);
        let restored = scaled.div_rows(&w).unwrap();
        assert_eq!(restored, x);
    }

    #[test]
    fn row_weights_handle_empty_channels() {
        let x = Tensor::zeros(2, 3, 0);
        let w = Tensor::full(2, 3, 1, 2.0);
        let scaled = x.mul_rows(&w).unwrap();
        assert_eq!(scaled.shape(), [2, 3, 0]);
        assert!(scaled.data().is_empty());
    }

    #[test]
    fn row_weights_require_single_channel() {
        let x = Tensor::ones(1, 2, 2);
        let err = x.mul_rows(&Tensor::ones(1, 2, 2)).expect_err("two weight channels");
        assert!(matches!(err, TomeError::Shape(_)));
    }

    #[test]
    fn json_round_trip_validates_shape() {
        let x = Tensor::from_nested(vec![vec![vec![1.0], vec![2.0]]]).unwrap();
        let text = serde_json::to_string(&x).unwrap();
        assert_eq!(text, r#"{"shape":[1,2,1],"data":[1.0,2.0]}"#);
        let parsed: Tensor = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, x);
        let bad = serde_json::from_str::<Tensor>(r#"{"shape":[1,2,2],"data":[1.0]}"#);
        assert!(bad.is_err());
    }
}
