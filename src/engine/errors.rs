//! Error types for sampler execution.

use thiserror::Error;

/// Errors that can occur while constructing a model or running the sampler.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in the future without breaking changes. All public APIs return
/// `Result<T, SamplerError>` to avoid panics in library code.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SamplerError {
    /// Malformed or inconsistent model input (e.g., a factor referencing an
    /// undefined variable, or a table of the wrong size).
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// Invalid run configuration (e.g., zero workers).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal invariant violation (programmer error, not user error).
    ///
    /// The running-intersection property failing during tree assembly lands
    /// here; downstream inference correctness depends on it, so the run halts.
    #[error("internal error: {0}")]
    Internal(String),
}
