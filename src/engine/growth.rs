//! Incremental junction tree growth under per-vertex claims.
//!
//! A worker grows one tree from a seed by repeatedly claiming the frontier
//! vertex whose admission increases the current maximum clique width the
//! least. Claim attempts are non-blocking: losing a race for a vertex removes
//! it from this tree's frontier and growth moves on, so no cross-worker
//! waiting can occur.
//!
//! Bound enforcement is structural. A candidate is admitted only after a full
//! elimination simulation (reverse claim order) confirms that every clique of
//! the resulting tree stays within the treewidth and factorsize bounds; an
//! inadmissible candidate is released and never retried, since the claimed
//! set only grows and widths only increase.

use std::cell::Cell;
use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rand::Rng;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::{smallvec, SmallVec};

use crate::engine::config::SamplerConfig;
use crate::engine::errors::SamplerError;
use crate::engine::junction_tree::{Clique, JunctionTree};
use crate::engine::mrf::{Mrf, WorkerId};
use crate::model::{FactorizedModel, VariableId};

/// Frontier candidate, ordered by (width-increase key, random tie-break).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct FrontierEntry {
    key: usize,
    tie: u64,
    vertex: VariableId,
    depth: u32,
}

/// Result of simulating elimination of a claim order (last claimed first).
struct Elimination {
    max_width: usize,
    max_state_space: usize,
    /// Per claim position: fill-graph neighbors claimed earlier, i.e. the
    /// separator of that vertex's clique, as positions into the claim order.
    separators: Vec<SmallVec<[usize; 8]>>,
}

/// Grows junction trees for one worker against the shared MRF state.
pub struct TreeGrower<'a> {
    model: &'a FactorizedModel,
    mrf: &'a Mrf,
    worker: WorkerId,
    config: &'a SamplerConfig,
    conflicts: Cell<u64>,
}

impl<'a> TreeGrower<'a> {
    pub fn new(
        model: &'a FactorizedModel,
        mrf: &'a Mrf,
        worker: WorkerId,
        config: &'a SamplerConfig,
    ) -> Self {
        Self {
            model,
            mrf,
            worker,
            config,
            conflicts: Cell::new(0),
        }
    }

    /// Claim races lost across this grower's lifetime, for run statistics.
    pub fn claim_conflicts(&self) -> u64 {
        self.conflicts.get()
    }

    /// Grows a tree from `seed`, claiming vertices as it goes.
    ///
    /// Returns `Ok(None)` when the seed itself is already claimed; the caller
    /// discards the attempt and picks a new seed. Any non-empty tree is
    /// usable, down to a single-vertex tree that degenerates to plain Gibbs.
    /// Claims stay held by this worker until the sampler commits.
    pub fn grow(
        &self,
        seed: VariableId,
        rng: &mut impl Rng,
    ) -> Result<Option<JunctionTree>, SamplerError> {
        if !self.mrf.try_claim(seed, self.worker) {
            self.conflicts.set(self.conflicts.get() + 1);
            return Ok(None);
        }

        let mut order: Vec<VariableId> = vec![seed];
        let mut depths: Vec<u32> = vec![0];
        let mut in_tree: FxHashSet<VariableId> = FxHashSet::default();
        in_tree.insert(seed);
        // Vertices lost to another tree or proven inadmissible; never retried.
        let mut blocked: FxHashSet<VariableId> = FxHashSet::default();
        let mut queued: FxHashSet<VariableId> = FxHashSet::default();
        let mut frontier: BinaryHeap<Reverse<FrontierEntry>> = BinaryHeap::new();

        self.push_neighbors(seed, 1, &in_tree, &blocked, &mut queued, &mut frontier, rng);

        while order.len() < self.config.treesize {
            let Some(Reverse(entry)) = frontier.pop() else {
                break;
            };
            let v = entry.vertex;
            queued.remove(&v);
            if in_tree.contains(&v) || blocked.contains(&v) {
                continue;
            }

            // The key goes stale as the tree grows around a queued vertex;
            // re-key lazily on pop instead of rebuilding the heap.
            let key = self
                .model
                .neighbors(v)
                .iter()
                .filter(|n| in_tree.contains(n))
                .count();
            if key > entry.key {
                queued.insert(v);
                frontier.push(Reverse(FrontierEntry { key, ..entry }));
                continue;
            }

            if key > self.config.treewidth {
                // The immediate clique already exceeds the width bound.
                blocked.insert(v);
                continue;
            }

            if !self.mrf.try_claim(v, self.worker) {
                // Unavailable for this tree; routine control flow.
                self.conflicts.set(self.conflicts.get() + 1);
                blocked.insert(v);
                continue;
            }

            order.push(v);
            if self.within_bounds(&order) {
                in_tree.insert(v);
                depths.push(entry.depth);
                self.push_neighbors(
                    v,
                    entry.depth + 1,
                    &in_tree,
                    &blocked,
                    &mut queued,
                    &mut frontier,
                    rng,
                );
            } else {
                order.pop();
                self.mrf.release(v, self.worker);
                blocked.insert(v);
            }
        }

        self.assemble(order, depths).map(Some)
    }

    fn push_neighbors(
        &self,
        from: VariableId,
        depth: u32,
        in_tree: &FxHashSet<VariableId>,
        blocked: &FxHashSet<VariableId>,
        queued: &mut FxHashSet<VariableId>,
        frontier: &mut BinaryHeap<Reverse<FrontierEntry>>,
        rng: &mut impl Rng,
    ) {
        if self.config.treeheight != 0 && depth as usize > self.config.treeheight {
            return;
        }
        for &n in self.model.neighbors(from) {
            if in_tree.contains(&n) || blocked.contains(&n) || queued.contains(&n) {
                continue;
            }
            let key = self
                .model
                .neighbors(n)
                .iter()
                .filter(|m| in_tree.contains(m))
                .count();
            queued.insert(n);
            frontier.push(Reverse(FrontierEntry {
                key,
                tie: rng.random::<u64>(),
                vertex: n,
                depth,
            }));
        }
    }

    /// Exact bound check for the claim order extended by its last element.
    fn within_bounds(&self, order: &[VariableId]) -> bool {
        let sim = simulate_elimination(self.model, order);
        if sim.max_width > self.config.treewidth {
            return false;
        }
        self.config.factorsize == 0 || sim.max_state_space <= self.config.factorsize
    }

    /// Builds the clique tree from the final claim order.
    ///
    /// Eliminating in reverse claim order gives each vertex a clique of
    /// itself plus its earlier-claimed fill neighbors; the parent is the
    /// clique of the latest-claimed separator member, which is guaranteed to
    /// contain the whole separator.
    fn assemble(
        &self,
        order: Vec<VariableId>,
        depths: Vec<u32>,
    ) -> Result<JunctionTree, SamplerError> {
        let sim = simulate_elimination(self.model, &order);
        let mut cliques = Vec::with_capacity(order.len());
        for (i, &v) in order.iter().enumerate() {
            let positions = &sim.separators[i];
            let mut scope: SmallVec<[VariableId; 8]> = smallvec![v];
            scope.extend(positions.iter().map(|&p| order[p]));
            let separator: SmallVec<[VariableId; 8]> =
                positions.iter().map(|&p| order[p]).collect();
            cliques.push(Clique {
                vertex: v,
                scope,
                separator,
                parent: positions.iter().copied().max(),
                children: Vec::new(),
                depth: depths[i],
            });
        }
        JunctionTree::new(cliques)
    }
}

/// Simulates eliminating `order` back to front over the induced MRF subgraph,
/// tracking fill edges, the widest clique, and the largest clique state space.
fn simulate_elimination(model: &FactorizedModel, order: &[VariableId]) -> Elimination {
    let positions: FxHashMap<VariableId, usize> = order
        .iter()
        .enumerate()
        .map(|(i, &v)| (v, i))
        .collect();

    let mut adj: Vec<FxHashSet<usize>> = vec![FxHashSet::default(); order.len()];
    for (i, &v) in order.iter().enumerate() {
        for n in model.neighbors(v) {
            if let Some(&j) = positions.get(n) {
                adj[i].insert(j);
            }
        }
    }

    let mut separators: Vec<SmallVec<[usize; 8]>> = vec![SmallVec::new(); order.len()];
    let mut max_width = 0usize;
    let mut max_state_space = 0usize;

    for i in (0..order.len()).rev() {
        let mut neigh: SmallVec<[usize; 8]> = adj[i].iter().copied().collect();
        neigh.sort_unstable();

        // Eliminating i pairwise-connects its remaining neighbors.
        for a in 0..neigh.len() {
            for b in (a + 1)..neigh.len() {
                adj[neigh[a]].insert(neigh[b]);
                adj[neigh[b]].insert(neigh[a]);
            }
        }
        for &n in &neigh {
            adj[n].remove(&i);
        }

        max_width = max_width.max(neigh.len());
        let space = neigh
            .iter()
            .map(|&p| model.arity(order[p]))
            .fold(model.arity(order[i]), usize::saturating_mul);
        max_state_space = max_state_space.max(space);
        separators[i] = neigh;
    }

    Elimination {
        max_width,
        max_state_space,
        separators,
    }
}
