//! Shared MRF state: one mutable vertex per model variable.
//!
//! The vertex arena is the single shared resource of a run. Workers
//! synchronize exclusively through per-vertex claims: a non-blocking
//! compare-exchange on an atomic owner word. A vertex's assignment, belief
//! counts, update counter, and height tag may only be written by the worker
//! currently holding its claim; any thread may read them (boundary vertices
//! serve as fixed evidence for neighboring trees). No global lock exists.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::RwLock;

use rand::Rng;

use crate::model::{FactorizedModel, VariableId};

/// Identifier of a claiming worker.
pub type WorkerId = u32;

/// Sentinel owner word meaning "no worker holds this vertex".
const UNCLAIMED: u32 = u32::MAX;

/// Mutable per-vertex run state, guarded by the vertex lock.
#[derive(Debug)]
struct VertexState {
    /// Current discrete assignment.
    assignment: usize,
    /// Per-state observation counts; normalized on read.
    belief: Vec<f64>,
    /// Number of sampling events that included this vertex.
    updates: u64,
    /// Growth depth in the most recent tree that claimed this vertex.
    height: u32,
}

#[derive(Debug)]
struct Vertex {
    claim: AtomicU32,
    state: RwLock<VertexState>,
}

/// Read-only view of one vertex, taken under its lock.
#[derive(Debug, Clone)]
pub struct VertexView {
    pub assignment: usize,
    pub belief_counts: Vec<f64>,
    pub updates: u64,
    pub height: u32,
}

/// The shared MRF vertex arena.
#[derive(Debug)]
pub struct Mrf {
    vertices: Vec<Vertex>,
}

impl Mrf {
    /// Builds the vertex arena from a model, drawing a uniform random
    /// initial assignment for every variable.
    pub fn from_model(model: &FactorizedModel, rng: &mut impl Rng) -> Self {
        let vertices = (0..model.num_variables())
            .map(|i| {
                let arity = model.arity(VariableId(i as u32));
                Vertex {
                    claim: AtomicU32::new(UNCLAIMED),
                    state: RwLock::new(VertexState {
                        assignment: rng.random_range(0..arity),
                        belief: vec![0.0; arity],
                        updates: 0,
                        height: 0,
                    }),
                }
            })
            .collect();
        Self { vertices }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Attempts to claim `vid` for `worker`. Never blocks.
    ///
    /// Returns false when another worker already holds the vertex; the caller
    /// treats that as "unavailable now", not as an error.
    #[inline]
    pub fn try_claim(&self, vid: VariableId, worker: WorkerId) -> bool {
        debug_assert_ne!(worker, UNCLAIMED);
        self.vertices[vid.idx()]
            .claim
            .compare_exchange(UNCLAIMED, worker, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Releases a claim held by `worker`.
    #[inline]
    pub fn release(&self, vid: VariableId, worker: WorkerId) {
        let prev = self.vertices[vid.idx()]
            .claim
            .swap(UNCLAIMED, Ordering::Release);
        debug_assert_eq!(prev, worker, "released a claim held by another worker");
        let _ = worker;
    }

    /// Current claim holder, if any.
    #[inline]
    pub fn claimed_by(&self, vid: VariableId) -> Option<WorkerId> {
        match self.vertices[vid.idx()].claim.load(Ordering::Acquire) {
            UNCLAIMED => None,
            owner => Some(owner),
        }
    }

    /// Current assignment of a vertex. Safe to call on unclaimed boundary
    /// vertices; their value serves as fixed evidence for the caller.
    #[inline]
    pub fn assignment(&self, vid: VariableId) -> usize {
        self.vertices[vid.idx()].state.read().unwrap().assignment
    }

    /// Current update counter of a vertex.
    #[inline]
    pub fn updates(&self, vid: VariableId) -> u64 {
        self.vertices[vid.idx()].state.read().unwrap().updates
    }

    /// Commits one sampling event for a claimed vertex: writes the new
    /// assignment, bumps the belief count for that state, increments the
    /// update counter, and records the growth height.
    ///
    /// The caller must hold the claim on `vid`.
    pub fn commit_vertex(
        &self,
        vid: VariableId,
        worker: WorkerId,
        assignment: usize,
        height: u32,
    ) {
        debug_assert_eq!(
            self.vertices[vid.idx()].claim.load(Ordering::Acquire),
            worker,
            "commit without holding the claim"
        );
        let _ = worker;
        let mut state = self.vertices[vid.idx()].state.write().unwrap();
        debug_assert!(assignment < state.belief.len());
        state.assignment = assignment;
        state.belief[assignment] += 1.0;
        state.updates += 1;
        state.height = height;
    }

    /// Consistent view of one vertex.
    pub fn vertex_view(&self, vid: VariableId) -> VertexView {
        let state = self.vertices[vid.idx()].state.read().unwrap();
        VertexView {
            assignment: state.assignment,
            belief_counts: state.belief.clone(),
            updates: state.updates,
            height: state.height,
        }
    }

    /// Copies the current joint assignment, indexed by variable id.
    pub fn current_assignment(&self) -> Vec<usize> {
        self.vertices
            .iter()
            .map(|v| v.state.read().unwrap().assignment)
            .collect()
    }

    /// Unnormalized log-likelihood of the current joint assignment under the
    /// model.
    pub fn log_likelihood(&self, model: &FactorizedModel) -> f64 {
        model.unnormalized_log_likelihood(&self.current_assignment())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Factor, FactorId, Variable};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn pair_model() -> FactorizedModel {
        let vars = vec![
            Variable {
                id: VariableId(0),
                arity: 2,
            },
            Variable {
                id: VariableId(1),
                arity: 3,
            },
        ];
        let f = Factor::from_weights(
            FactorId(0),
            vec![VariableId(0), VariableId(1)],
            vec![2, 3],
            vec![1.0; 6],
        )
        .expect("factor");
        FactorizedModel::new(vars, vec![f]).expect("model")
    }

    #[test]
    fn claims_are_exclusive() {
        let model = pair_model();
        let mut rng = StdRng::seed_from_u64(1);
        let mrf = Mrf::from_model(&model, &mut rng);

        assert!(mrf.try_claim(VariableId(0), 7));
        assert!(!mrf.try_claim(VariableId(0), 8));
        assert_eq!(mrf.claimed_by(VariableId(0)), Some(7));

        mrf.release(VariableId(0), 7);
        assert_eq!(mrf.claimed_by(VariableId(0)), None);
        assert!(mrf.try_claim(VariableId(0), 8));
    }

    #[test]
    fn concurrent_claims_admit_one_winner() {
        let model = pair_model();
        let mut rng = StdRng::seed_from_u64(2);
        let mrf = Mrf::from_model(&model, &mut rng);

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8u32)
                .map(|w| {
                    let mrf = &mrf;
                    scope.spawn(move || mrf.try_claim(VariableId(1), w))
                })
                .collect();
            let wins = handles
                .into_iter()
                .map(|h| h.join().expect("thread"))
                .filter(|&won| won)
                .count();
            assert_eq!(wins, 1);
        });
    }

    #[test]
    fn commit_updates_counters_and_belief() {
        let model = pair_model();
        let mut rng = StdRng::seed_from_u64(3);
        let mrf = Mrf::from_model(&model, &mut rng);

        assert!(mrf.try_claim(VariableId(1), 1));
        mrf.commit_vertex(VariableId(1), 1, 2, 4);
        mrf.release(VariableId(1), 1);

        let view = mrf.vertex_view(VariableId(1));
        assert_eq!(view.assignment, 2);
        assert_eq!(view.updates, 1);
        assert_eq!(view.height, 4);
        assert_eq!(view.belief_counts, vec![0.0, 0.0, 1.0]);
    }

    #[test]
    fn initial_assignments_are_in_domain() {
        let model = pair_model();
        let mut rng = StdRng::seed_from_u64(4);
        let mrf = Mrf::from_model(&model, &mut rng);
        assert!(mrf.assignment(VariableId(0)) < 2);
        assert!(mrf.assignment(VariableId(1)) < 3);
    }
}
