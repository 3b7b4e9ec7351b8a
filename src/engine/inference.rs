//! Exact two-pass sum-product over a completed junction tree.
//!
//! Clique potentials collect every factor whose claimed scope lives in the
//! clique, with boundary (unclaimed) variables instantiated to their current
//! assignments as fixed evidence. All arithmetic stays in the log domain;
//! probabilities are only materialized when a caller normalizes a table
//! slice, so large joint domains cannot underflow.
//!
//! Messages flow leaves-to-root over separators and back down, leaving each
//! clique with its calibrated (unnormalized) joint table. With
//! `subthreads > 1` the upward computations of sibling subtrees run through
//! rayon and serialize at the shared separator, a bounded-fan-out parallel
//! reduction.

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::engine::errors::SamplerError;
use crate::engine::junction_tree::JunctionTree;
use crate::engine::mrf::Mrf;
use crate::model::{FactorId, FactorizedModel, VariableId};

/// Fixed boundary assignment captured once at inference start.
#[derive(Debug, Clone, Default)]
pub struct Evidence {
    values: FxHashMap<VariableId, usize>,
}

impl Evidence {
    /// Reads the current assignment of every boundary variable adjacent to
    /// the tree through some factor.
    pub fn capture(model: &FactorizedModel, tree: &JunctionTree, mrf: &Mrf) -> Self {
        let tree_set: FxHashSet<VariableId> = tree.vertices().collect();
        let mut values = FxHashMap::default();
        for vid in tree.vertices() {
            for &fid in model.factors_of(vid) {
                for &scope_var in model.factor(fid).scope() {
                    if !tree_set.contains(&scope_var) {
                        values
                            .entry(scope_var)
                            .or_insert_with(|| mrf.assignment(scope_var));
                    }
                }
            }
        }
        Self { values }
    }

    /// Explicit evidence for tests and offline queries.
    pub fn from_values(values: impl IntoIterator<Item = (VariableId, usize)>) -> Self {
        Self {
            values: values.into_iter().collect(),
        }
    }

    #[inline]
    fn get(&self, vid: VariableId) -> Option<usize> {
        self.values.get(&vid).copied()
    }
}

/// A log-domain table over an ordered variable scope.
///
/// Layout is row-major with the first scope variable slowest, matching the
/// clique layout `[vertex, separator...]` so that marginalizing the vertex
/// and slicing at a separator assignment are both contiguous-stride walks.
#[derive(Debug, Clone)]
pub struct CliqueTable {
    scope: SmallVec<[VariableId; 8]>,
    arities: SmallVec<[usize; 8]>,
    values: Vec<f64>,
}

impl CliqueTable {
    fn zeros(scope: SmallVec<[VariableId; 8]>, arities: SmallVec<[usize; 8]>) -> Self {
        let space = arities.iter().product();
        Self {
            scope,
            arities,
            values: vec![0.0; space],
        }
    }

    fn neg_inf(scope: SmallVec<[VariableId; 8]>, arities: SmallVec<[usize; 8]>) -> Self {
        let space = arities.iter().product();
        Self {
            scope,
            arities,
            values: vec![f64::NEG_INFINITY; space],
        }
    }

    #[inline]
    pub fn scope(&self) -> &[VariableId] {
        &self.scope
    }

    #[inline]
    pub fn log_values(&self) -> &[f64] {
        &self.values
    }

    /// Decodes a flat index into per-variable states.
    fn decode(&self, mut idx: usize, out: &mut [usize]) {
        for i in (0..self.arities.len()).rev() {
            out[i] = idx % self.arities[i];
            idx /= self.arities[i];
        }
    }

    /// Normalized linear-domain marginal of one scope variable.
    pub fn marginal(&self, vid: VariableId) -> Option<Vec<f64>> {
        let pos = self.scope.iter().position(|&v| v == vid)?;
        let arity = self.arities[pos];
        let mut log_marg = vec![f64::NEG_INFINITY; arity];
        let mut states = vec![0usize; self.scope.len()];
        for (idx, &lv) in self.values.iter().enumerate() {
            self.decode(idx, &mut states);
            log_marg[states[pos]] = log_add_exp(log_marg[states[pos]], lv);
        }
        Some(normalize_log_weights(&log_marg))
    }
}

/// Calibrated clique tables, indexed parallel to the tree's cliques.
#[derive(Debug)]
pub struct TreeDistribution {
    cliques: Vec<CliqueTable>,
}

impl TreeDistribution {
    #[inline]
    pub fn clique(&self, idx: usize) -> &CliqueTable {
        &self.cliques[idx]
    }

    #[inline]
    pub fn num_cliques(&self) -> usize {
        self.cliques.len()
    }
}

/// Runs the two-pass sum-product over `tree`, conditioned on `evidence`.
pub fn infer(
    model: &FactorizedModel,
    tree: &JunctionTree,
    evidence: &Evidence,
    subthreads: usize,
) -> Result<TreeDistribution, SamplerError> {
    let potentials = build_potentials(model, tree, evidence)?;

    // Upward pass: leaves to root, collecting each clique's alpha table
    // (potential plus all child messages).
    let mut alphas: Vec<Option<CliqueTable>> = vec![None; tree.num_vertices()];
    let (subtree, _root_msg) = upward(tree, &potentials, 0, subthreads);
    for (idx, alpha) in subtree {
        alphas[idx] = Some(alpha);
    }
    let mut calibrated: Vec<CliqueTable> = alphas
        .into_iter()
        .enumerate()
        .map(|(idx, a)| {
            a.ok_or_else(|| {
                SamplerError::Internal(format!("upward pass missed clique {}", idx))
            })
        })
        .collect::<Result<_, _>>()?;

    // Downward pass: parents before children. The message to a child is the
    // parent's calibrated table with the child's own upward contribution
    // divided out, marginalized onto the separator.
    for idx in 1..tree.num_vertices() {
        let clique = &tree.cliques()[idx];
        let parent = clique.parent.ok_or_else(|| {
            SamplerError::Internal(format!("non-root clique {} has no parent", idx))
        })?;

        let up_msg = marginalize_out_first(&calibrated[idx]);
        let mut parent_less_child = calibrated[parent].clone();
        subtract_broadcast(&mut parent_less_child, &up_msg)?;
        let down_msg = marginalize_onto(&parent_less_child, &calibrated[idx].scope[1..])?;
        add_broadcast(&mut calibrated[idx], &down_msg)?;
    }

    Ok(TreeDistribution { cliques: calibrated })
}

/// Builds each clique's local potential table.
///
/// Every factor with at least one claimed variable in scope is assigned to
/// the clique of its latest-claimed scope member; that clique is guaranteed
/// to contain the factor's whole claimed scope.
fn build_potentials(
    model: &FactorizedModel,
    tree: &JunctionTree,
    evidence: &Evidence,
) -> Result<Vec<CliqueTable>, SamplerError> {
    let claim_position: FxHashMap<VariableId, usize> = tree
        .vertices()
        .enumerate()
        .map(|(i, v)| (v, i))
        .collect();

    let mut assigned: Vec<Vec<FactorId>> = vec![Vec::new(); tree.num_vertices()];
    let mut seen: FxHashSet<FactorId> = FxHashSet::default();
    for vid in tree.vertices() {
        for &fid in model.factors_of(vid) {
            if !seen.insert(fid) {
                continue;
            }
            let home = model
                .factor(fid)
                .scope()
                .iter()
                .filter_map(|v| claim_position.get(v).copied())
                .max()
                .ok_or_else(|| {
                    SamplerError::Internal(format!(
                        "factor {:?} assigned to a tree that claims none of its scope",
                        fid
                    ))
                })?;
            assigned[home].push(fid);
        }
    }

    tree.cliques()
        .iter()
        .zip(assigned)
        .map(|(clique, factors)| {
            let arities: SmallVec<[usize; 8]> =
                clique.scope.iter().map(|&v| model.arity(v)).collect();
            let mut table = CliqueTable::zeros(clique.scope.clone(), arities);

            let scope_pos: FxHashMap<VariableId, usize> = clique
                .scope
                .iter()
                .enumerate()
                .map(|(i, &v)| (v, i))
                .collect();
            let mut states = vec![0usize; clique.scope.len()];
            for idx in 0..table.values.len() {
                table.decode(idx, &mut states);
                let mut total = 0.0;
                for &fid in &factors {
                    let factor = model.factor(fid);
                    total += factor_log_value(factor, &scope_pos, &states, evidence)?;
                }
                table.values[idx] = total;
            }
            Ok(table)
        })
        .collect()
}

fn factor_log_value(
    factor: &crate::model::Factor,
    scope_pos: &FxHashMap<VariableId, usize>,
    states: &[usize],
    evidence: &Evidence,
) -> Result<f64, SamplerError> {
    let mut factor_states: SmallVec<[usize; 4]> = SmallVec::new();
    for &vid in factor.scope() {
        let state = match scope_pos.get(&vid) {
            Some(&pos) => states[pos],
            None => evidence.get(vid).ok_or_else(|| {
                SamplerError::Internal(format!(
                    "boundary variable {:?} missing from evidence",
                    vid
                ))
            })?,
        };
        factor_states.push(state);
    }
    Ok(factor.log_value(&factor_states))
}

/// Recursive upward pass. Returns every alpha table of the subtree rooted at
/// `idx` together with the message to its parent.
fn upward(
    tree: &JunctionTree,
    potentials: &[CliqueTable],
    idx: usize,
    subthreads: usize,
) -> (Vec<(usize, CliqueTable)>, CliqueTable) {
    let clique = &tree.cliques()[idx];

    let child_results: Vec<(Vec<(usize, CliqueTable)>, CliqueTable)> = if subthreads > 1 {
        clique
            .children
            .par_iter()
            .map(|&c| upward(tree, potentials, c, subthreads))
            .collect()
    } else {
        clique
            .children
            .iter()
            .map(|&c| upward(tree, potentials, c, subthreads))
            .collect()
    };

    let mut alpha = potentials[idx].clone();
    let mut collected = Vec::new();
    for (subtree, msg) in child_results {
        collected.extend(subtree);
        // Child messages live on separators contained in this scope, so the
        // broadcast cannot fail; surface any mismatch as a poisoned table.
        if add_broadcast(&mut alpha, &msg).is_err() {
            alpha.values.fill(f64::NAN);
        }
    }

    let msg = marginalize_out_first(&alpha);
    collected.push((idx, alpha));
    (collected, msg)
}

/// Marginalizes out the first scope variable (the clique's own vertex),
/// yielding a table over the separator.
fn marginalize_out_first(table: &CliqueTable) -> CliqueTable {
    let sep_scope: SmallVec<[VariableId; 8]> = table.scope[1..].iter().copied().collect();
    let sep_arities: SmallVec<[usize; 8]> = table.arities[1..].iter().copied().collect();
    let sep_space: usize = sep_arities.iter().product();
    let mut out = CliqueTable::neg_inf(sep_scope, sep_arities);
    for (idx, &lv) in table.values.iter().enumerate() {
        let sep_idx = idx % sep_space;
        out.values[sep_idx] = log_add_exp(out.values[sep_idx], lv);
    }
    out
}

/// Marginalizes a table onto an ordered subset of its scope.
fn marginalize_onto(
    table: &CliqueTable,
    target: &[VariableId],
) -> Result<CliqueTable, SamplerError> {
    let positions: Vec<usize> = target
        .iter()
        .map(|vid| {
            table.scope.iter().position(|v| v == vid).ok_or_else(|| {
                SamplerError::Internal(format!(
                    "separator variable {:?} missing from parent scope",
                    vid
                ))
            })
        })
        .collect::<Result<_, _>>()?;

    let target_scope: SmallVec<[VariableId; 8]> = target.iter().copied().collect();
    let target_arities: SmallVec<[usize; 8]> =
        positions.iter().map(|&p| table.arities[p]).collect();
    let mut out = CliqueTable::neg_inf(target_scope, target_arities);

    let mut states = vec![0usize; table.scope.len()];
    for (idx, &lv) in table.values.iter().enumerate() {
        table.decode(idx, &mut states);
        let mut t_idx = 0;
        for (slot, &p) in positions.iter().enumerate() {
            t_idx = t_idx * out.arities[slot] + states[p];
        }
        out.values[t_idx] = log_add_exp(out.values[t_idx], lv);
    }
    Ok(out)
}

/// Adds a smaller table into `dst`, broadcasting over the missing variables.
fn add_broadcast(dst: &mut CliqueTable, src: &CliqueTable) -> Result<(), SamplerError> {
    apply_broadcast(dst, src, |d, s| *d += s)
}

/// Divides a smaller table out of `dst` in the log domain. Entries that are
/// `-inf` in `dst` stay `-inf` regardless of the divisor.
fn subtract_broadcast(dst: &mut CliqueTable, src: &CliqueTable) -> Result<(), SamplerError> {
    apply_broadcast(dst, src, |d, s| {
        if *d != f64::NEG_INFINITY {
            *d -= s;
        }
    })
}

fn apply_broadcast(
    dst: &mut CliqueTable,
    src: &CliqueTable,
    op: impl Fn(&mut f64, f64),
) -> Result<(), SamplerError> {
    let positions: Vec<usize> = src
        .scope
        .iter()
        .map(|vid| {
            dst.scope.iter().position(|v| v == vid).ok_or_else(|| {
                SamplerError::Internal(format!(
                    "broadcast variable {:?} missing from destination scope",
                    vid
                ))
            })
        })
        .collect::<Result<_, _>>()?;

    let mut states = vec![0usize; dst.scope.len()];
    for idx in 0..dst.values.len() {
        dst.decode(idx, &mut states);
        let mut s_idx = 0;
        for (slot, &p) in positions.iter().enumerate() {
            s_idx = s_idx * src.arities[slot] + states[p];
        }
        op(&mut dst.values[idx], src.values[s_idx]);
    }
    Ok(())
}

/// Numerically stable log(exp(a) + exp(b)).
#[inline]
pub(crate) fn log_add_exp(a: f64, b: f64) -> f64 {
    let m = a.max(b);
    if !m.is_finite() {
        return m;
    }
    m + ((a - m).exp() + (b - m).exp()).ln()
}

/// Converts log-weights to a normalized probability vector.
///
/// A zero-support input (all `-inf`) falls back to uniform; it can only
/// arise from zero-weight potentials and must not poison the caller.
pub(crate) fn normalize_log_weights(log_weights: &[f64]) -> Vec<f64> {
    let max = log_weights.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return vec![1.0 / log_weights.len() as f64; log_weights.len()];
    }
    let mut probs: Vec<f64> = log_weights.iter().map(|&w| (w - max).exp()).collect();
    let total: f64 = probs.iter().sum();
    for p in &mut probs {
        *p /= total;
    }
    probs
}
