//! Configuration builders controlling which strategy merges tokens and how.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TomeError};
use crate::matching::{build_bipartite, build_kary, build_random_with_rng, MergeOperator};
use crate::reduce::MergeMode;
use crate::tensor::Tensor;

/// Partition strategy and its parameters.
///
/// Parameters are not validated: a reduction that leaves nothing to merge
/// produces the identity operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Strategy {
    /// Even/odd split removing up to `r` tokens.
    Bipartite {
        /// Tokens removed per step.
        r: usize,
        /// Position 0 holds a class token that must never merge.
        #[serde(default)]
        class_token: bool,
        /// Position 1 holds a distillation token that must never merge.
        #[serde(default)]
        distill_token: bool,
    },
    /// Groups of `k` tokens reduced to one each.
    Kary {
        /// Group size.
        k: usize,
    },
    /// `r` randomly chosen tokens merged into the rest.
    Random {
        /// Tokens removed per step.
        r: usize,
        /// Seed for reproducible splits; `None` draws fresh entropy every run.
        #[serde(default)]
        seed: Option<u64>,
    },
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Bipartite {
            r: 8,
            class_token: false,
            distill_token: false,
        }
    }
}

impl Strategy {
    /// Builds the merge operator for `metric`, drawing any randomness from `rng`.
    pub fn build<R>(&self, metric: &Tensor, rng: &mut R) -> MergeOperator
    where
        R: Rng + ?Sized,
    {
        match *self {
            Strategy::Bipartite {
                r,
                class_token,
                distill_token,
            } => build_bipartite(metric, r, class_token, distill_token),
            Strategy::Kary { k } => build_kary(metric, k),
            Strategy::Random { r, .. } => build_random_with_rng(metric, r, rng),
        }
    }

    /// Short label naming the strategy.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::Bipartite { .. } => "bipartite",
            Strategy::Kary { .. } => "kary",
            Strategy::Random { .. } => "random",
        }
    }
}

/// Configuration for a chain of merge steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Partition strategy applied at every step.
    pub strategy: Strategy,
    /// Reduction used when `weighted_average` is disabled.
    pub mode: MergeMode,
    /// Merge values as a size-weighted running mean, threading sizes between steps.
    pub weighted_average: bool,
    /// Track which original tokens make up each merged token.
    pub track_source: bool,
    /// Number of consecutive merge steps.
    pub steps: usize,
}

impl MergeConfig {
    /// Returns a builder initialised with [`MergeConfig::default`].
    #[must_use]
    pub fn builder() -> MergeConfigBuilder {
        MergeConfigBuilder::default()
    }

    /// Validates the invariants required to run a merge chain.
    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            return Err(TomeError::InvalidConfig(
                "steps must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            mode: MergeMode::Mean,
            weighted_average: true,
            track_source: false,
            steps: 1,
        }
    }
}

/// Builder for [`MergeConfig`].
#[derive(Debug, Default, Clone)]
pub struct MergeConfigBuilder {
    cfg: MergeConfig,
}

impl MergeConfigBuilder {
    /// Sets the partition strategy.
    #[must_use]
    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.cfg.strategy = strategy;
        self
    }

    /// Sets the reduction used for unweighted merges.
    #[must_use]
    pub fn mode(mut self, mode: MergeMode) -> Self {
        self.cfg.mode = mode;
        self
    }

    /// Enables or disables size-weighted averaging.
    #[must_use]
    pub fn weighted_average(mut self, enabled: bool) -> Self {
        self.cfg.weighted_average = enabled;
        self
    }

    /// Enables or disables provenance tracking.
    #[must_use]
    pub fn track_source(mut self, enabled: bool) -> Self {
        self.cfg.track_source = enabled;
        self
    }

    /// Sets the number of chained merge steps.
    #[must_use]
    pub fn steps(mut self, steps: usize) -> Self {
        self.cfg.steps = steps;
        self
    }

    /// Finalises the builder, returning a validated [`MergeConfig`].
    pub fn build(self) -> Result<MergeConfig> {
        self.cfg.validate()?;
        Ok(self.cfg)
    }
}
