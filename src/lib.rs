//! Token merging (ToMe) for token sequences shaped `[batch, tokens, channels]`.
//!
//! The crate reduces the number of tokens in a sequence by matching similar
//! tokens and fusing them, keeps enough index state to expand a reduced
//! sequence back to its original length, and tracks how many original tokens
//! (and which ones) each merged token stands for.  Typical usage builds a
//! [`MergeOperator`] from a metric tensor and applies it to one or more value
//! tensors.
//!
//! ```
//! use tome::{build_bipartite, merge_source, merge_wavg, Tensor};
//!
//! # fn main() -> tome::Result<()> {
//! let x = Tensor::from_nested(vec![vec![
//!     vec![1.0, 0.0],
//!     vec![0.9, 0.1],
//!     vec![0.0, 1.0],
//!     vec![0.1, 0.9],
//!     vec![0.7, 0.7],
//!     vec![0.6, 0.8],
//! ]])?;
//! let op = build_bipartite(&x, 2, false, false);
//! let (merged, size) = merge_wavg(&op, &x, None)?;
//! let source = merge_source(&op, &x, None)?;
//! assert_eq!(merged.tokens(), 4);
//! assert_eq!(size.data().iter().sum::<f32>(), 6.0);
//! assert_eq!(source.shape(), [1, 4, 6]);
//! # Ok(())
//! # }
//! ```
//!
//! The `tome` command line interface is enabled by default through the `cli`
//! feature.  Library users can disable default features to avoid the CLI
//! dependencies: `tome = { version = "...", default-features = false }`.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    clippy::all,
    rust_2018_idioms,
    future_incompatible,
    unused_lifetimes,
    unreachable_pub
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::doc_markdown,
    clippy::multiple_crate_versions
)]

pub mod aggregate;
pub mod config;
pub mod error;
pub mod matching;
pub mod merger;
pub mod metric;
pub mod metrics;
pub mod reduce;
pub mod serialization;
pub mod span;
pub mod tensor;

pub use aggregate::{merge_source, merge_wavg};
pub use config::{MergeConfig, MergeConfigBuilder, Strategy};
pub use error::{Result, TomeError};
pub use matching::{
    build_bipartite, build_kary, build_random, build_random_with_rng, BipartiteMatch, KaryMatch,
    MergeOperator, RandomMatch,
};
pub use merger::{MergeArtifacts, TokenMerger};
pub use metric::normalize;
pub use metrics::{MergeMetrics, StepMetrics};
pub use reduce::MergeMode;
pub use tensor::Tensor;
