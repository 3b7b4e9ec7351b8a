//! Immutable factorized model: discrete variables and log-domain factors.
//!
//! A [`FactorizedModel`] is the input to the sampler. It owns the variables
//! (each with a finite arity), the factors (potential tables over small
//! variable subsets, stored in the log domain to avoid underflow), and the
//! derived MRF adjacency: two variables are neighbors iff some factor scope
//! contains both. The model is never mutated once constructed; all mutable
//! run state lives in [`crate::engine::mrf::Mrf`].

use rayon::prelude::*;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::engine::errors::SamplerError;

/// A unique identifier for a variable in the model.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct VariableId(pub u32);

impl VariableId {
    /// Index into per-variable arenas.
    #[inline]
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

/// A unique identifier for a factor in the model.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub struct FactorId(pub u32);

impl FactorId {
    #[inline]
    pub fn idx(self) -> usize {
        self.0 as usize
    }
}

/// A discrete variable with a finite number of states.
#[derive(Debug, Clone)]
pub struct Variable {
    pub id: VariableId,
    /// Number of discrete states, always >= 2.
    pub arity: usize,
}

/// A potential function over an ordered subset of variables.
///
/// The table is flattened row-major with the last scope variable varying
/// fastest, and holds log-weights. A weight of zero in the linear domain is
/// represented as `f64::NEG_INFINITY`.
#[derive(Debug, Clone)]
pub struct Factor {
    pub id: FactorId,
    scope: SmallVec<[VariableId; 4]>,
    arities: SmallVec<[usize; 4]>,
    log_table: Vec<f64>,
}

impl Factor {
    /// Creates a factor from a log-domain table.
    ///
    /// The table must have exactly one entry per joint assignment of the
    /// scope, and no entry may be NaN or `+inf`.
    pub fn from_log_table(
        id: FactorId,
        scope: Vec<VariableId>,
        arities: Vec<usize>,
        log_table: Vec<f64>,
    ) -> Result<Self, SamplerError> {
        if scope.is_empty() {
            return Err(SamplerError::InvalidModel(format!(
                "factor {:?} has an empty scope",
                id
            )));
        }
        if scope.len() != arities.len() {
            return Err(SamplerError::InvalidModel(format!(
                "factor {:?}: scope has {} variables but {} arities were given",
                id,
                scope.len(),
                arities.len()
            )));
        }
        let mut seen = FxHashSet::default();
        for &vid in &scope {
            if !seen.insert(vid) {
                return Err(SamplerError::InvalidModel(format!(
                    "factor {:?}: variable {:?} appears twice in the scope",
                    id, vid
                )));
            }
        }
        let expected: usize = arities.iter().product();
        if log_table.len() != expected {
            return Err(SamplerError::InvalidModel(format!(
                "factor {:?}: table has {} entries, scope requires {}",
                id,
                log_table.len(),
                expected
            )));
        }
        if log_table.iter().any(|w| w.is_nan() || *w == f64::INFINITY) {
            return Err(SamplerError::InvalidModel(format!(
                "factor {:?}: table contains NaN or +inf log-weights",
                id
            )));
        }
        Ok(Self {
            id,
            scope: scope.into(),
            arities: arities.into(),
            log_table,
        })
    }

    /// Creates a factor from linear-domain weights.
    ///
    /// Weights must be non-negative; zero maps to `-inf` in the log table.
    pub fn from_weights(
        id: FactorId,
        scope: Vec<VariableId>,
        arities: Vec<usize>,
        weights: Vec<f64>,
    ) -> Result<Self, SamplerError> {
        if weights.iter().any(|w| !(*w >= 0.0)) {
            return Err(SamplerError::InvalidModel(format!(
                "factor {:?}: negative or NaN weight",
                id
            )));
        }
        let log_table = weights.into_iter().map(f64::ln).collect();
        Self::from_log_table(id, scope, arities, log_table)
    }

    /// Ordered scope of the factor.
    #[inline]
    pub fn scope(&self) -> &[VariableId] {
        &self.scope
    }

    /// Arity of each scope variable, aligned with [`Factor::scope`].
    #[inline]
    pub fn arities(&self) -> &[usize] {
        &self.arities
    }

    /// Flattened row-major index for a joint assignment of the scope.
    #[inline]
    pub fn table_index(&self, states: &[usize]) -> usize {
        debug_assert_eq!(states.len(), self.scope.len());
        let mut idx = 0;
        for (state, arity) in states.iter().zip(self.arities.iter()) {
            debug_assert!(state < arity);
            idx = idx * arity + state;
        }
        idx
    }

    /// Log-weight for a joint assignment of the scope.
    #[inline]
    pub fn log_value(&self, states: &[usize]) -> f64 {
        self.log_table[self.table_index(states)]
    }

    /// Log-weight with each scope variable's state supplied by a lookup.
    pub fn log_value_with(&self, lookup: impl Fn(VariableId) -> usize) -> f64 {
        let mut idx = 0;
        for (&vid, &arity) in self.scope.iter().zip(self.arities.iter()) {
            let state = lookup(vid);
            debug_assert!(state < arity);
            idx = idx * arity + state;
        }
        self.log_table[idx]
    }
}

/// An immutable collection of variables and factors with derived adjacency.
#[derive(Debug)]
pub struct FactorizedModel {
    variables: Vec<Variable>,
    factors: Vec<Factor>,
    var_to_factors: Vec<SmallVec<[FactorId; 8]>>,
    neighbors: Vec<Vec<VariableId>>,
}

impl FactorizedModel {
    /// Builds a model, validating factor scopes against the variable set.
    ///
    /// Variables must be supplied in id order (`variables[i].id == i`) so that
    /// ids can index arenas directly. Factor ids are reassigned to match their
    /// position.
    pub fn new(variables: Vec<Variable>, factors: Vec<Factor>) -> Result<Self, SamplerError> {
        for (i, var) in variables.iter().enumerate() {
            if var.id.idx() != i {
                return Err(SamplerError::InvalidModel(format!(
                    "variable at position {} has id {:?}; ids must be dense and ordered",
                    i, var.id
                )));
            }
            if var.arity < 2 {
                return Err(SamplerError::InvalidModel(format!(
                    "variable {:?} has arity {}, minimum is 2",
                    var.id, var.arity
                )));
            }
        }

        let mut var_to_factors: Vec<SmallVec<[FactorId; 8]>> =
            vec![SmallVec::new(); variables.len()];
        let mut neighbor_sets: Vec<FxHashSet<VariableId>> =
            vec![FxHashSet::default(); variables.len()];

        let mut factors = factors;
        for (pos, factor) in factors.iter_mut().enumerate() {
            factor.id = FactorId(pos as u32);
            for (&vid, &arity) in factor.scope.iter().zip(factor.arities.iter()) {
                let var = variables.get(vid.idx()).ok_or_else(|| {
                    SamplerError::InvalidModel(format!(
                        "factor {:?} references undefined variable {:?}",
                        factor.id, vid
                    ))
                })?;
                if var.arity != arity {
                    return Err(SamplerError::InvalidModel(format!(
                        "factor {:?}: variable {:?} has arity {} in the model but {} in the factor",
                        factor.id, vid, var.arity, arity
                    )));
                }
            }
            for &vid in factor.scope.iter() {
                var_to_factors[vid.idx()].push(factor.id);
                for &other in factor.scope.iter() {
                    if other != vid {
                        neighbor_sets[vid.idx()].insert(other);
                    }
                }
            }
        }

        // Stable neighbor order keeps growth deterministic under a fixed seed.
        let neighbors = neighbor_sets
            .into_iter()
            .map(|set| {
                let mut list: Vec<VariableId> = set.into_iter().collect();
                list.sort_unstable();
                list
            })
            .collect();

        Ok(Self {
            variables,
            factors,
            var_to_factors,
            neighbors,
        })
    }

    #[inline]
    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    #[inline]
    pub fn num_factors(&self) -> usize {
        self.factors.len()
    }

    #[inline]
    pub fn variable(&self, vid: VariableId) -> &Variable {
        &self.variables[vid.idx()]
    }

    #[inline]
    pub fn arity(&self, vid: VariableId) -> usize {
        self.variables[vid.idx()].arity
    }

    #[inline]
    pub fn factor(&self, fid: FactorId) -> &Factor {
        &self.factors[fid.idx()]
    }

    #[inline]
    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }

    /// Factors whose scope contains `vid`.
    #[inline]
    pub fn factors_of(&self, vid: VariableId) -> &[FactorId] {
        &self.var_to_factors[vid.idx()]
    }

    /// MRF neighbors of `vid`, in ascending id order.
    #[inline]
    pub fn neighbors(&self, vid: VariableId) -> &[VariableId] {
        &self.neighbors[vid.idx()]
    }

    /// Unnormalized log-likelihood of a full joint assignment.
    ///
    /// Scores every factor at the given assignment. `assignment` is indexed
    /// by variable id.
    pub fn unnormalized_log_likelihood(&self, assignment: &[usize]) -> f64 {
        debug_assert_eq!(assignment.len(), self.variables.len());
        self.factors
            .par_iter()
            .map(|factor| factor.log_value_with(|vid| assignment[vid.idx()]))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary_vars(n: usize) -> Vec<Variable> {
        (0..n)
            .map(|i| Variable {
                id: VariableId(i as u32),
                arity: 2,
            })
            .collect()
    }

    #[test]
    fn table_index_is_row_major_last_fastest() {
        let f = Factor::from_weights(
            FactorId(0),
            vec![VariableId(0), VariableId(1)],
            vec![2, 3],
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        )
        .expect("factor");

        assert_eq!(f.table_index(&[0, 0]), 0);
        assert_eq!(f.table_index(&[0, 2]), 2);
        assert_eq!(f.table_index(&[1, 0]), 3);
        assert!((f.log_value(&[1, 2]) - 6.0_f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn neighbors_derived_from_shared_scopes() {
        let f = Factor::from_weights(
            FactorId(0),
            vec![VariableId(0), VariableId(1)],
            vec![2, 2],
            vec![1.0; 4],
        )
        .expect("factor");
        let g = Factor::from_weights(
            FactorId(1),
            vec![VariableId(1), VariableId(2)],
            vec![2, 2],
            vec![1.0; 4],
        )
        .expect("factor");

        let model = FactorizedModel::new(binary_vars(3), vec![f, g]).expect("model");
        assert_eq!(model.neighbors(VariableId(0)), &[VariableId(1)]);
        assert_eq!(
            model.neighbors(VariableId(1)),
            &[VariableId(0), VariableId(2)]
        );
        assert_eq!(model.factors_of(VariableId(1)).len(), 2);
    }

    #[test]
    fn undefined_variable_is_rejected() {
        let f = Factor::from_weights(
            FactorId(0),
            vec![VariableId(0), VariableId(7)],
            vec![2, 2],
            vec![1.0; 4],
        )
        .expect("factor");
        let err = FactorizedModel::new(binary_vars(2), vec![f]).unwrap_err();
        assert!(matches!(err, SamplerError::InvalidModel(_)));
    }

    #[test]
    fn negative_weight_is_rejected() {
        let err = Factor::from_weights(
            FactorId(0),
            vec![VariableId(0)],
            vec![2],
            vec![0.5, -0.5],
        )
        .unwrap_err();
        assert!(matches!(err, SamplerError::InvalidModel(_)));
    }

    #[test]
    fn bad_table_size_is_rejected() {
        let err = Factor::from_weights(
            FactorId(0),
            vec![VariableId(0), VariableId(1)],
            vec![2, 2],
            vec![1.0; 3],
        )
        .unwrap_err();
        assert!(matches!(err, SamplerError::InvalidModel(_)));
    }

    #[test]
    fn log_likelihood_sums_factor_log_values() {
        let f = Factor::from_weights(
            FactorId(0),
            vec![VariableId(0), VariableId(1)],
            vec![2, 2],
            vec![1.0, 2.0, 3.0, 4.0],
        )
        .expect("factor");
        let g =
            Factor::from_weights(FactorId(1), vec![VariableId(1)], vec![2], vec![5.0, 6.0])
                .expect("factor");
        let model = FactorizedModel::new(binary_vars(2), vec![f, g]).expect("model");

        let ll = model.unnormalized_log_likelihood(&[1, 0]);
        let expected = 3.0_f64.ln() + 5.0_f64.ln();
        assert!((ll - expected).abs() < 1e-12);
    }
}
