//! Read-only capture of the shared state after (or during) a run.
//!
//! A snapshot copies every vertex's reporting fields out of the arena so that
//! downstream consumers (estimators, exporters) never touch the live locks.
//! Belief counts are normalized to a probability vector at capture time; a
//! vertex that was never sampled reports a uniform belief.

use crate::engine::mrf::Mrf;
use crate::model::{FactorizedModel, VariableId};

/// Reporting fields of one vertex.
#[derive(Debug, Clone)]
pub struct VertexReport {
    /// Assignment at capture time.
    pub assignment: usize,
    /// Normalized per-state belief estimate.
    pub belief: Vec<f64>,
    /// Number of sampling events that included this vertex.
    pub updates: u64,
    /// Growth depth in the most recent tree that sampled this vertex.
    pub height: u32,
}

/// A consistent-enough point-in-time copy of the run's observable state.
///
/// Vertices are read one at a time, so a snapshot taken while workers are
/// still committing is per-vertex consistent rather than globally atomic;
/// capture after [`crate::engine::coordinator::run`] returns for an exact
/// picture.
#[derive(Debug, Clone)]
pub struct MrfSnapshot {
    vertices: Vec<VertexReport>,
    total_updates: u64,
    log_likelihood: f64,
}

impl MrfSnapshot {
    /// Captures all vertex reports, the aggregate update count, and the
    /// unnormalized log-likelihood of the current joint assignment.
    pub fn capture(model: &FactorizedModel, mrf: &Mrf) -> Self {
        let vertices: Vec<VertexReport> = (0..mrf.len())
            .map(|i| {
                let view = mrf.vertex_view(VariableId(i as u32));
                let total: f64 = view.belief_counts.iter().sum();
                let belief = if total > 0.0 {
                    view.belief_counts.iter().map(|c| c / total).collect()
                } else {
                    let arity = view.belief_counts.len();
                    vec![1.0 / arity as f64; arity]
                };
                VertexReport {
                    assignment: view.assignment,
                    belief,
                    updates: view.updates,
                    height: view.height,
                }
            })
            .collect();
        let total_updates = vertices.iter().map(|v| v.updates).sum();
        let log_likelihood = mrf.log_likelihood(model);
        Self {
            vertices,
            total_updates,
            log_likelihood,
        }
    }

    #[inline]
    pub fn vertex(&self, vid: VariableId) -> &VertexReport {
        &self.vertices[vid.idx()]
    }

    #[inline]
    pub fn vertices(&self) -> &[VertexReport] {
        &self.vertices
    }

    /// Sum of all per-vertex update counters.
    #[inline]
    pub fn total_updates(&self) -> u64 {
        self.total_updates
    }

    /// Unnormalized log-likelihood of the captured joint assignment.
    #[inline]
    pub fn log_likelihood(&self) -> f64 {
        self.log_likelihood
    }
}
