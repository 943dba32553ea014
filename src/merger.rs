//! Chained merging: repeated merge steps threading sizes and provenance.

use std::fmt;
use std::time::Instant;

use log::debug;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::aggregate::{merge_source, merge_wavg};
use crate::config::{MergeConfig, MergeConfigBuilder, Strategy};
use crate::error::Result;
use crate::matching::MergeOperator;
use crate::metrics::{MergeMetrics, StepMetrics};
use crate::tensor::Tensor;

/// High-level façade running a configured chain of merge steps.
#[derive(Debug, Clone)]
pub struct TokenMerger {
    cfg: MergeConfig,
}

/// Artifacts returned after a merge chain completes.
#[must_use]
#[derive(Debug, Clone)]
pub struct MergeArtifacts {
    /// Merged values.
    pub tokens: Tensor,
    /// Original-token count per merged token, when weighted averaging is enabled.
    pub size: Option<Tensor>,
    /// Provenance matrix, when source tracking is enabled.
    pub source: Option<Tensor>,
    /// Operator of every step, in execution order.
    pub operators: Vec<MergeOperator>,
    /// Per-step metrics.
    pub metrics: MergeMetrics,
}

impl TokenMerger {
    /// Creates a merger for the supplied configuration.
    #[must_use]
    pub fn new(cfg: MergeConfig) -> Self {
        Self { cfg }
    }

    /// Returns a [`MergeConfigBuilder`] with default settings.
    #[must_use]
    pub fn builder() -> MergeConfigBuilder {
        MergeConfig::builder()
    }

    /// Returns an immutable reference to the underlying configuration.
    #[must_use]
    pub fn config(&self) -> &MergeConfig {
        &self.cfg
    }

    /// Runs the configured merge chain over `values`.
    ///
    /// The first step matches tokens on `metric`; every later step matches on
    /// the values produced by the previous step. `metric` and `values` must
    /// share batch and token counts.
    pub fn run(&self, metric: &Tensor, values: &Tensor) -> Result<MergeArtifacts> {
        self.cfg.validate()?;
        values.expect_tokens(metric.batch(), metric.tokens(), "token merger")?;

        let mut rng: Box<dyn RngCore> = match self.cfg.strategy {
            Strategy::Random {
                seed: Some(seed), ..
            } => Box::new(StdRng::seed_from_u64(seed)),
            _ => Box::new(rand::thread_rng()),
        };

        let mut tokens = values.clone();
        let mut size: Option<Tensor> = None;
        let mut source: Option<Tensor> = None;
        let mut operators = Vec::with_capacity(self.cfg.steps);
        let mut metrics = MergeMetrics::new(self.cfg.steps);
        let chain_start = Instant::now();

        for step in 1..=self.cfg.steps {
            let step_start = Instant::now();
            let tokens_in = tokens.tokens();
            let op = {
                let matched_on = if step == 1 { metric } else { &tokens };
                self.cfg.strategy.build(matched_on, &mut *rng)
            };

            if self.cfg.track_source {
                source = Some(merge_source(&op, &tokens, source.as_ref())?);
            }
            if self.cfg.weighted_average {
                let (merged, merged_size) = merge_wavg(&op, &tokens, size.as_ref())?;
                tokens = merged;
                size = Some(merged_size);
            } else {
                tokens = op.merge(&tokens, self.cfg.mode)?;
            }

            let step_metrics = StepMetrics {
                step,
                strategy: op.strategy_name().to_string(),
                tokens_in,
                tokens_out: tokens.tokens(),
                elapsed: step_start.elapsed(),
            };
            debug!(
                "step {:>3} {:<9} tokens {:>6} -> {:>6} in {:.2?}",
                step,
                step_metrics.strategy,
                step_metrics.tokens_in,
                step_metrics.tokens_out,
                step_metrics.elapsed
            );
            metrics.steps.push(step_metrics);
            operators.push(op);
        }

        metrics.total_duration = chain_start.elapsed();
        debug!(
            "merged {} tokens over {} steps in {:.2?}",
            metrics.removed(),
            metrics.steps.len(),
            metrics.total_duration
        );

        Ok(MergeArtifacts {
            tokens,
            size,
            source,
            operators,
            metrics,
        })
    }
}

impl MergeArtifacts {
    /// Expands `x` back through every step, last step first.
    ///
    /// `x` must have the token count produced by the final step. The result
    /// has the original token count, minus any tokens a k-ary step truncated.
    pub fn unmerge(&self, x: &Tensor) -> Result<Tensor> {
        self.operators
            .iter()
            .rev()
            .try_fold(x.clone(), |acc, op| op.unmerge(&acc))
    }
}

impl fmt::Display for MergeArtifacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [batch, tokens, channels] = self.tokens.shape();
        writeln!(f, "Merged tensor {batch}×{tokens}×{channels}")?;
        writeln!(f, "Steps: {}", self.metrics.steps.len())?;
        writeln!(f, "Tokens removed: {}", self.metrics.removed())?;
        writeln!(f, "Total duration: {:?}", self.metrics.total_duration)?;
        Ok(())
    }
}
