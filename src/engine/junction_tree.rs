//! Junction tree structure built by a growth worker.
//!
//! A tree owns one clique per claimed vertex. Cliques are stored in claim
//! order and linked by index-based parent pointers, so the structure is
//! acyclic by construction. Because each clique's scope is its vertex plus
//! the separator with its parent, every clique introduces exactly one new
//! variable relative to its parent, which keeps the downward sampling pass a
//! pure ancestral walk.

use smallvec::SmallVec;

use crate::engine::errors::SamplerError;
use crate::model::{FactorizedModel, VariableId};

/// One clique of a junction tree.
#[derive(Debug, Clone)]
pub struct Clique {
    /// The claimed vertex this clique introduces.
    pub vertex: VariableId,
    /// Full clique scope: `vertex` followed by the separator variables.
    pub scope: SmallVec<[VariableId; 8]>,
    /// Intersection with the parent clique, equal to `scope` minus `vertex`.
    pub separator: SmallVec<[VariableId; 8]>,
    /// Parent clique index; `None` only for the root.
    pub parent: Option<usize>,
    /// Child clique indices.
    pub children: Vec<usize>,
    /// Growth depth of `vertex` (seed is depth 0).
    pub depth: u32,
}

impl Clique {
    /// Clique width: scope size minus one.
    #[inline]
    pub fn width(&self) -> usize {
        self.scope.len() - 1
    }
}

/// A completed (possibly partial) junction tree over claimed vertices.
#[derive(Debug)]
pub struct JunctionTree {
    cliques: Vec<Clique>,
}

impl JunctionTree {
    /// Assembles a tree from cliques in claim order and verifies the
    /// running-intersection property.
    ///
    /// Clique 0 must be the root (the seed's clique, empty separator), and
    /// every parent index must precede its child. A running-intersection
    /// violation is a fatal invariant failure, not a recoverable condition.
    pub fn new(mut cliques: Vec<Clique>) -> Result<Self, SamplerError> {
        if cliques.is_empty() {
            return Err(SamplerError::Internal(
                "junction tree must contain at least one clique".into(),
            ));
        }
        if cliques[0].parent.is_some() || !cliques[0].separator.is_empty() {
            return Err(SamplerError::Internal(
                "clique 0 must be the root with an empty separator".into(),
            ));
        }

        for idx in 0..cliques.len() {
            cliques[idx].children.clear();
        }
        for idx in 1..cliques.len() {
            let parent = match cliques[idx].parent {
                Some(p) if p < idx => p,
                _ => {
                    return Err(SamplerError::Internal(format!(
                        "clique {} has a missing or forward parent pointer",
                        idx
                    )));
                }
            };
            cliques[parent].children.push(idx);
        }

        let tree = Self { cliques };
        if !tree.verify_running_intersection() {
            return Err(SamplerError::Internal(
                "running-intersection property violated during tree assembly".into(),
            ));
        }
        Ok(tree)
    }

    /// Cliques in claim order; index 0 is the root.
    #[inline]
    pub fn cliques(&self) -> &[Clique] {
        &self.cliques
    }

    /// Number of claimed vertices (one per clique).
    #[inline]
    pub fn num_vertices(&self) -> usize {
        self.cliques.len()
    }

    /// Claimed vertices in claim order.
    pub fn vertices(&self) -> impl Iterator<Item = VariableId> + '_ {
        self.cliques.iter().map(|c| c.vertex)
    }

    /// Whether `vid` is claimed by this tree.
    pub fn contains(&self, vid: VariableId) -> bool {
        self.cliques.iter().any(|c| c.vertex == vid)
    }

    /// Maximum clique width.
    pub fn width(&self) -> usize {
        self.cliques.iter().map(Clique::width).max().unwrap_or(0)
    }

    /// Maximum growth depth over claimed vertices.
    pub fn growth_depth(&self) -> u32 {
        self.cliques.iter().map(|c| c.depth).max().unwrap_or(0)
    }

    /// Largest clique state-space size under the model's arities.
    pub fn max_state_space(&self, model: &FactorizedModel) -> usize {
        self.cliques
            .iter()
            .map(|c| c.scope.iter().map(|&v| model.arity(v)).product())
            .max()
            .unwrap_or(0)
    }

    /// Checks the running-intersection property: for every variable, the
    /// cliques containing it form a connected subtree.
    ///
    /// In a rooted tree the containing set is connected iff exactly one of
    /// its members has a parent outside the set (or no parent at all).
    pub fn verify_running_intersection(&self) -> bool {
        let mut vars: Vec<VariableId> = self
            .cliques
            .iter()
            .flat_map(|c| c.scope.iter().copied())
            .collect();
        vars.sort_unstable();
        vars.dedup();

        for var in vars {
            let mut members = 0usize;
            let mut roots = 0usize;
            for clique in &self.cliques {
                if !clique.scope.contains(&var) {
                    continue;
                }
                members += 1;
                let parent_has = clique
                    .parent
                    .map(|p| self.cliques[p].scope.contains(&var))
                    .unwrap_or(false);
                if !parent_has {
                    roots += 1;
                }
            }
            if members > 0 && roots != 1 {
                return false;
            }
        }
        true
    }
}
