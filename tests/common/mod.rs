//! Shared model builders for integration tests.

use treegibbs::{Factor, FactorId, FactorizedModel, Variable, VariableId};

/// Binary grid MRF with attractive pairwise couplings.
///
/// Vertex (r, c) has id `r * cols + c`; each grid edge carries the table
/// `[coupling, 1, 1, coupling]`.
pub fn grid_model(rows: usize, cols: usize, coupling: f64) -> FactorizedModel {
    let variables = (0..rows * cols)
        .map(|i| Variable {
            id: VariableId(i as u32),
            arity: 2,
        })
        .collect();

    let mut factors = Vec::new();
    let vid = |r: usize, c: usize| VariableId((r * cols + c) as u32);
    for r in 0..rows {
        for c in 0..cols {
            if c + 1 < cols {
                factors.push(pairwise(factors.len(), vid(r, c), vid(r, c + 1), coupling));
            }
            if r + 1 < rows {
                factors.push(pairwise(factors.len(), vid(r, c), vid(r + 1, c), coupling));
            }
        }
    }
    FactorizedModel::new(variables, factors).expect("grid model")
}

/// Fully-connected binary MRF over `n` variables with one pairwise factor per
/// pair. The tables are deliberately asymmetric so no marginal is uniform.
pub fn complete_model(n: usize) -> FactorizedModel {
    let variables = (0..n)
        .map(|i| Variable {
            id: VariableId(i as u32),
            arity: 2,
        })
        .collect();

    let mut factors = Vec::new();
    for a in 0..n {
        for b in (a + 1)..n {
            let coupling = 1.5 + (a + b) as f64 * 0.5;
            let factor = Factor::from_weights(
                FactorId(factors.len() as u32),
                vec![VariableId(a as u32), VariableId(b as u32)],
                vec![2, 2],
                vec![coupling, 1.0, 0.5, 1.5 * coupling],
            )
            .expect("pairwise factor");
            factors.push(factor);
        }
    }
    FactorizedModel::new(variables, factors).expect("complete model")
}

fn pairwise(id: usize, a: VariableId, b: VariableId, coupling: f64) -> Factor {
    Factor::from_weights(
        FactorId(id as u32),
        vec![a, b],
        vec![2, 2],
        vec![coupling, 1.0, 1.0, coupling],
    )
    .expect("pairwise factor")
}

/// Exact single-variable marginals of a small binary model by enumeration.
pub fn brute_force_marginals(model: &FactorizedModel) -> Vec<Vec<f64>> {
    let n = model.num_variables();
    assert!(n <= 20, "enumeration only feasible for small models");

    let mut marginals = vec![vec![0.0f64; 2]; n];
    let mut total = 0.0f64;
    for code in 0..(1usize << n) {
        let assignment: Vec<usize> = (0..n).map(|i| (code >> i) & 1).collect();
        let weight = model.unnormalized_log_likelihood(&assignment).exp();
        total += weight;
        for (i, &state) in assignment.iter().enumerate() {
            marginals[i][state] += weight;
        }
    }
    for m in &mut marginals {
        m[0] /= total;
        m[1] /= total;
    }
    marginals
}
