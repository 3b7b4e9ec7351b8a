//! Run coordinator: worker pool, seed selection, and the wall-clock budget.
//!
//! Each worker loops full tree lifecycles (seed, grow, infer, sample, commit)
//! against the shared MRF state until the deadline passes. Workers never wait
//! on each other; a lost seed race discards the attempt and retries with a
//! fresh seed after yielding the time slice. Per-tree events flow back to the
//! coordinator over a crossbeam channel and are folded into [`RunStats`].

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Sender};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::engine::config::SamplerConfig;
use crate::engine::errors::SamplerError;
use crate::engine::growth::TreeGrower;
use crate::engine::inference::{infer, Evidence};
use crate::engine::mrf::{Mrf, WorkerId};
use crate::engine::sampler::sample_and_commit;
use crate::model::{FactorizedModel, VariableId};

/// Aggregated statistics of one sampler run.
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Trees grown, inferred, and committed.
    pub trees: u64,
    /// Total vertices sampled across all trees.
    pub vertices_sampled: u64,
    /// Seed claims lost to another worker (the attempt is discarded).
    pub discarded_seeds: u64,
    /// All claim races lost during growth, seeds included.
    pub claim_conflicts: u64,
    /// Wall-clock time from start to the last worker finishing.
    pub elapsed: Duration,
}

enum WorkerEvent {
    TreeSampled { vertices: usize, width: usize },
    Finished { discarded_seeds: u64, claim_conflicts: u64 },
    Failed { worker: WorkerId, error: SamplerError },
}

/// Picks the next seed vertex for a worker.
///
/// Uniform selection draws any vertex with equal probability. Priority
/// selection keeps a min-heap keyed by each vertex's update counter with a
/// random tie-break, re-keyed lazily on pop, so cold vertices are revisited
/// first without a global rebuild.
enum SeedSelector {
    Uniform { num_vertices: usize },
    Priority { heap: BinaryHeap<Reverse<SeedEntry>> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SeedEntry {
    updates: u64,
    tie: u64,
    vertex: VariableId,
}

impl SeedSelector {
    fn new(config: &SamplerConfig, num_vertices: usize, rng: &mut impl Rng) -> Self {
        if !config.priorities {
            return Self::Uniform { num_vertices };
        }
        let heap = (0..num_vertices)
            .map(|i| {
                Reverse(SeedEntry {
                    updates: 0,
                    tie: rng.random::<u64>(),
                    vertex: VariableId(i as u32),
                })
            })
            .collect();
        Self::Priority { heap }
    }

    fn next(&mut self, mrf: &Mrf, rng: &mut impl Rng) -> VariableId {
        match self {
            Self::Uniform { num_vertices } => {
                VariableId(rng.random_range(0..*num_vertices) as u32)
            }
            Self::Priority { heap } => loop {
                // The heap is seeded with every vertex and each pop pushes a
                // successor entry, so it can never run dry.
                let Reverse(entry) = heap.pop().unwrap();
                let current = mrf.updates(entry.vertex);
                if current > entry.updates {
                    // Stale key; re-queue at the true priority.
                    heap.push(Reverse(SeedEntry {
                        updates: current,
                        tie: rng.random::<u64>(),
                        vertex: entry.vertex,
                    }));
                    continue;
                }
                heap.push(Reverse(SeedEntry {
                    updates: current + 1,
                    tie: rng.random::<u64>(),
                    vertex: entry.vertex,
                }));
                return entry.vertex;
            },
        }
    }
}

/// Runs the parallel sampler for the configured wall-clock budget.
///
/// No new tree lifecycle starts once the budget elapses; trees already in
/// flight run to completion, so the elapsed time can slightly exceed the
/// budget. All claims are released when this returns.
pub fn run(
    model: &FactorizedModel,
    mrf: &Mrf,
    config: &SamplerConfig,
) -> Result<RunStats, SamplerError> {
    config.validate()?;
    if model.num_variables() == 0 {
        return Err(SamplerError::InvalidModel(
            "model has no variables to sample".into(),
        ));
    }

    let start = Instant::now();
    let deadline = start + config.runtime;
    info!(
        workers = config.workers,
        runtime_ms = config.runtime.as_millis() as u64,
        treesize = config.treesize,
        treewidth = config.treewidth,
        "sampler run starting"
    );

    let (tx, rx) = unbounded::<WorkerEvent>();
    std::thread::scope(|scope| {
        for worker in 0..config.workers as WorkerId {
            let tx = tx.clone();
            scope.spawn(move || worker_loop(model, mrf, config, worker, deadline, tx));
        }
        drop(tx);

        let mut stats = RunStats::default();
        let mut first_error: Option<SamplerError> = None;
        for event in rx {
            match event {
                WorkerEvent::TreeSampled { vertices, width } => {
                    stats.trees += 1;
                    stats.vertices_sampled += vertices as u64;
                    debug!(vertices, width, "tree committed");
                }
                WorkerEvent::Finished {
                    discarded_seeds,
                    claim_conflicts,
                } => {
                    stats.discarded_seeds += discarded_seeds;
                    stats.claim_conflicts += claim_conflicts;
                }
                WorkerEvent::Failed { worker, error } => {
                    warn!(worker, %error, "worker failed");
                    first_error.get_or_insert(error);
                }
            }
        }

        if let Some(error) = first_error {
            return Err(error);
        }
        stats.elapsed = start.elapsed();
        info!(
            trees = stats.trees,
            vertices = stats.vertices_sampled,
            discarded_seeds = stats.discarded_seeds,
            claim_conflicts = stats.claim_conflicts,
            "sampler run finished"
        );
        Ok(stats)
    })
}

fn worker_loop(
    model: &FactorizedModel,
    mrf: &Mrf,
    config: &SamplerConfig,
    worker: WorkerId,
    deadline: Instant,
    tx: Sender<WorkerEvent>,
) {
    // Each worker derives its own RNG stream from the run seed.
    let mut rng = StdRng::seed_from_u64(
        config
            .seed
            .wrapping_add(0x9e37_79b9_7f4a_7c15u64.wrapping_mul(worker as u64 + 1)),
    );
    let grower = TreeGrower::new(model, mrf, worker, config);
    let mut selector = SeedSelector::new(config, model.num_variables(), &mut rng);
    let mut discarded_seeds = 0u64;

    while Instant::now() < deadline {
        let seed = selector.next(mrf, &mut rng);
        let tree = match grower.grow(seed, &mut rng) {
            Ok(Some(tree)) => tree,
            Ok(None) => {
                discarded_seeds += 1;
                // Every vertex may be claimed elsewhere right now; yield so
                // the holders can finish instead of spinning on seeds.
                std::thread::yield_now();
                continue;
            }
            Err(error) => {
                let _ = tx.send(WorkerEvent::Failed { worker, error });
                return;
            }
        };

        let evidence = Evidence::capture(model, &tree, mrf);
        let outcome = infer(model, &tree, &evidence, config.subthreads).and_then(|dist| {
            sample_and_commit(model, &tree, &dist, mrf, worker, &mut rng)
        });
        match outcome {
            Ok(assignments) => {
                let _ = tx.send(WorkerEvent::TreeSampled {
                    vertices: assignments.len(),
                    width: tree.width(),
                });
            }
            Err(error) => {
                // sample_and_commit releases claims on its own failure path,
                // but an inference error leaves them held; release here.
                if mrf.claimed_by(tree.cliques()[0].vertex) == Some(worker) {
                    for vid in tree.vertices() {
                        mrf.release(vid, worker);
                    }
                }
                let _ = tx.send(WorkerEvent::Failed { worker, error });
                return;
            }
        }
    }

    let _ = tx.send(WorkerEvent::Finished {
        discarded_seeds,
        claim_conflicts: grower.claim_conflicts(),
    });
}
