//! # Treegibbs - Parallel Junction-Tree Blocked Gibbs Sampling
//!
//! Treegibbs draws samples from a discrete Markov Random Field by growing
//! many small junction trees concurrently over the shared graph, running
//! exact inference within each tree, and jointly resampling each tree's
//! block of variables.
//!
//! ## Architecture
//!
//! - **model**: Immutable factorized model (variables, log-domain factors,
//!   derived MRF adjacency)
//! - **engine**: Execution engine — shared vertex state with per-vertex
//!   claims, junction-tree growth under width/size/height bounds, two-pass
//!   sum-product inference, block sampling, and the worker-pool coordinator
//!
//! ## Usage
//!
//! ```rust,ignore
//! use treegibbs::{run, Mrf, MrfSnapshot, SamplerConfig};
//!
//! let model = build_model()?;
//! let mut rng = rand::rngs::StdRng::seed_from_u64(0);
//! let mrf = Mrf::from_model(&model, &mut rng);
//!
//! let stats = run(&model, &mrf, &SamplerConfig::default())?;
//! let snapshot = MrfSnapshot::capture(&model, &mrf);
//! println!("{} trees, log-likelihood {}", stats.trees, snapshot.log_likelihood());
//! ```

#![forbid(unsafe_code)]

pub mod engine;
pub mod model;

// Re-export commonly used types
pub use engine::config::SamplerConfig;
pub use engine::coordinator::{run, RunStats};
pub use engine::errors::SamplerError;
pub use engine::mrf::Mrf;
pub use engine::snapshot::MrfSnapshot;
pub use model::{Factor, FactorId, FactorizedModel, Variable, VariableId};
