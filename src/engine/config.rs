//! Run configuration for the parallel sampler.

use std::time::Duration;

use crate::engine::errors::SamplerError;

/// Configuration for one sampler run.
///
/// All fields are immutable for the duration of a run invocation. The bounds
/// (`treesize`, `treewidth`, `treeheight`, `factorsize`) limit every tree a
/// worker grows; `treeheight` and `factorsize` use zero to mean unbounded,
/// matching the conventions of the original command-line surface.
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Number of concurrent tree-growth workers.
    pub workers: usize,
    /// Wall-clock budget. No new tree lifecycle starts after it elapses;
    /// in-flight trees run to completion.
    pub runtime: Duration,
    /// Maximum number of claimed vertices per tree.
    pub treesize: usize,
    /// Maximum clique width (clique size minus one) per tree.
    pub treewidth: usize,
    /// Maximum growth depth from the seed. Zero disables the bound.
    pub treeheight: usize,
    /// Maximum clique state-space size. Zero disables the bound.
    pub factorsize: usize,
    /// Threads available for the upward inference pass inside one tree.
    pub subthreads: usize,
    /// Bias seed selection toward the least-updated vertices.
    pub priorities: bool,
    /// Seed for the run's random number generators. Worker RNGs are derived
    /// from it, so single-worker runs are reproducible.
    pub seed: u64,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            runtime: Duration::from_secs(10),
            treesize: 1000,
            treewidth: 3,
            treeheight: 0,
            factorsize: 0,
            subthreads: 1,
            priorities: false,
            seed: 0,
        }
    }
}

impl SamplerConfig {
    /// Validates the configuration, returning it unchanged on success.
    pub fn validate(&self) -> Result<(), SamplerError> {
        if self.workers == 0 {
            return Err(SamplerError::InvalidConfig(
                "workers must be > 0".into(),
            ));
        }
        if self.treesize == 0 {
            return Err(SamplerError::InvalidConfig(
                "treesize must be > 0".into(),
            ));
        }
        if self.treewidth == 0 {
            return Err(SamplerError::InvalidConfig(
                "treewidth must be > 0".into(),
            ));
        }
        if self.subthreads == 0 {
            return Err(SamplerError::InvalidConfig(
                "subthreads must be > 0".into(),
            ));
        }
        Ok(())
    }
}
