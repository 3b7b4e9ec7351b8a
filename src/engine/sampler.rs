//! Joint resampling of a tree's block from its calibrated distribution.
//!
//! Sampling walks the cliques in claim order. Every clique introduces exactly
//! one variable beyond its separator, and all separator variables belong to
//! earlier cliques, so conditioning each clique table on the already-sampled
//! separator assignment yields an exact ancestral draw from the tree's joint
//! conditional. The new assignments are committed to the shared state and
//! every claim is released, in both the success and the failure path.

use rand::Rng;
use rustc_hash::FxHashMap;

use crate::engine::errors::SamplerError;
use crate::engine::inference::{normalize_log_weights, TreeDistribution};
use crate::engine::junction_tree::JunctionTree;
use crate::engine::mrf::{Mrf, WorkerId};
use crate::model::{FactorizedModel, VariableId};

/// Draws one exact joint sample for a tree's block, commits it, and releases
/// all claims.
///
/// Returns the sampled assignments in claim order. The distribution must be
/// calibrated for `tree` (one table per clique, scopes aligned).
pub fn sample_and_commit(
    model: &FactorizedModel,
    tree: &JunctionTree,
    dist: &TreeDistribution,
    mrf: &Mrf,
    worker: WorkerId,
    rng: &mut impl Rng,
) -> Result<Vec<usize>, SamplerError> {
    let result = draw_joint(model, tree, dist, rng);

    match result {
        Ok(assignments) => {
            for (clique, &assignment) in tree.cliques().iter().zip(assignments.iter()) {
                mrf.commit_vertex(clique.vertex, worker, assignment, clique.depth);
            }
            for vid in tree.vertices() {
                mrf.release(vid, worker);
            }
            Ok(assignments)
        }
        Err(err) => {
            // A poisoned distribution must not leave claims stranded.
            for vid in tree.vertices() {
                mrf.release(vid, worker);
            }
            Err(err)
        }
    }
}

/// Ancestral draw over the cliques, root first.
fn draw_joint(
    model: &FactorizedModel,
    tree: &JunctionTree,
    dist: &TreeDistribution,
    rng: &mut impl Rng,
) -> Result<Vec<usize>, SamplerError> {
    if dist.num_cliques() != tree.num_vertices() {
        return Err(SamplerError::Internal(format!(
            "distribution has {} cliques for a {}-clique tree",
            dist.num_cliques(),
            tree.num_vertices()
        )));
    }

    let claim_position: FxHashMap<VariableId, usize> = tree
        .vertices()
        .enumerate()
        .map(|(i, v)| (v, i))
        .collect();

    let mut assignments: Vec<usize> = Vec::with_capacity(tree.num_vertices());
    for (idx, clique) in tree.cliques().iter().enumerate() {
        let table = dist.clique(idx);
        let arity = model.arity(clique.vertex);

        // Flat index of the separator assignment within the table; separator
        // variables appear after the vertex, latest dimension fastest.
        let mut sep_space = 1usize;
        let mut sep_idx = 0usize;
        for (pos, &sep_var) in clique.separator.iter().enumerate() {
            let claim_pos = *claim_position.get(&sep_var).ok_or_else(|| {
                SamplerError::Internal(format!(
                    "separator variable {:?} not claimed by this tree",
                    sep_var
                ))
            })?;
            if claim_pos >= idx {
                return Err(SamplerError::Internal(format!(
                    "separator variable {:?} sampled after clique {}",
                    sep_var, idx
                )));
            }
            debug_assert_eq!(table.scope()[pos + 1], sep_var);
            sep_idx = sep_idx * model.arity(sep_var) + assignments[claim_pos];
            sep_space *= model.arity(sep_var);
        }

        let values = table.log_values();
        let mut log_slice = Vec::with_capacity(arity);
        for a in 0..arity {
            log_slice.push(values[a * sep_space + sep_idx]);
        }
        let probs = normalize_log_weights(&log_slice);
        assignments.push(sample_categorical(&probs, rng));
    }
    Ok(assignments)
}

/// Samples an index from a normalized probability vector.
fn sample_categorical(probs: &[f64], rng: &mut impl Rng) -> usize {
    let mut u = rng.random::<f64>();
    for (idx, &p) in probs.iter().enumerate() {
        if u < p {
            return idx;
        }
        u -= p;
    }
    probs.len() - 1
}
