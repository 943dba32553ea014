//! Metrics describing each step of a merge chain.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Metrics captured for one merge step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepMetrics {
    /// Sequential step number (1-indexed).
    pub step: usize,
    /// Strategy that built the step's operator, `identity` when nothing merged.
    pub strategy: String,
    /// Tokens per sequence before the step.
    pub tokens_in: usize,
    /// Tokens per sequence after the step.
    pub tokens_out: usize,
    /// Time spent matching and merging.
    pub elapsed: Duration,
}

impl StepMetrics {
    /// Tokens removed by the step.
    #[must_use]
    pub fn removed(&self) -> usize {
        self.tokens_in - self.tokens_out
    }
}

/// Aggregate metrics produced by a merge chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeMetrics {
    /// Per-step snapshots in execution order.
    pub steps: Vec<StepMetrics>,
    /// Total duration of the chain.
    pub total_duration: Duration,
}

impl MergeMetrics {
    /// Creates an empty metrics container with pre-allocated capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            steps: Vec::with_capacity(capacity),
            total_duration: Duration::ZERO,
        }
    }

    /// Total tokens removed across every step.
    #[must_use]
    pub fn removed(&self) -> usize {
        self.steps.iter().map(StepMetrics::removed).sum()
    }
}
