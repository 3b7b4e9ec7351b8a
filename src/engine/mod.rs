//! Sampler engine: shared state, tree growth, inference, and coordination.

pub mod config;
pub mod coordinator;
pub mod errors;
pub mod growth;
pub mod inference;
pub mod junction_tree;
pub mod mrf;
pub mod sampler;
pub mod snapshot;
