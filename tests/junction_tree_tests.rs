//! Integration tests for tree growth: bounds, running intersection, and the
//! non-blocking claim protocol under concurrency.

mod common;

use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use treegibbs::engine::growth::TreeGrower;
use treegibbs::{Mrf, SamplerConfig, VariableId};

fn config(treesize: usize, treewidth: usize) -> SamplerConfig {
    SamplerConfig {
        workers: 1,
        runtime: Duration::from_millis(10),
        treesize,
        treewidth,
        treeheight: 0,
        factorsize: 0,
        subthreads: 1,
        priorities: false,
        seed: 0,
    }
}

#[test]
fn grown_trees_respect_bounds_on_grid() {
    let model = common::grid_model(5, 5, 2.0);
    let mut rng = StdRng::seed_from_u64(101);
    let mrf = Mrf::from_model(&model, &mut rng);
    let config = config(8, 2);
    let grower = TreeGrower::new(&model, &mrf, 1, &config);

    for seed in [0u32, 6, 12, 18, 24] {
        let tree = grower
            .grow(VariableId(seed), &mut rng)
            .expect("grow")
            .expect("seed claim");

        assert!(tree.num_vertices() <= 8);
        assert!(tree.width() <= 2);
        assert!(tree.verify_running_intersection());
        assert!(tree.contains(VariableId(seed)));
        for vid in tree.vertices() {
            assert_eq!(mrf.claimed_by(vid), Some(1));
            mrf.release(vid, 1);
        }
    }
}

#[test]
fn factorsize_bound_holds_on_grid() {
    let model = common::grid_model(4, 4, 2.0);
    let mut rng = StdRng::seed_from_u64(102);
    let mrf = Mrf::from_model(&model, &mut rng);
    let config = SamplerConfig {
        factorsize: 8,
        ..config(10, 4)
    };
    let grower = TreeGrower::new(&model, &mrf, 1, &config);

    let tree = grower
        .grow(VariableId(5), &mut rng)
        .expect("grow")
        .expect("seed claim");
    assert!(tree.max_state_space(&model) <= 8);
    assert!(tree.verify_running_intersection());
}

#[test]
fn concurrent_growth_claims_are_disjoint() {
    let model = common::grid_model(6, 6, 2.0);
    let mut rng = StdRng::seed_from_u64(103);
    let mrf = Mrf::from_model(&model, &mut rng);
    let config = config(9, 2);

    // Four workers grow simultaneously from spread-out seeds and hold their
    // claims; the claimed blocks must never overlap.
    let seeds = [0u32, 5, 30, 35];
    let trees: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = seeds
            .iter()
            .enumerate()
            .map(|(w, &seed)| {
                let model = &model;
                let mrf = &mrf;
                let config = &config;
                scope.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(200 + w as u64);
                    let grower = TreeGrower::new(model, mrf, w as u32, config);
                    grower
                        .grow(VariableId(seed), &mut rng)
                        .expect("grow")
                        .expect("seed claim")
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().expect("thread")).collect()
    });

    let mut seen = std::collections::HashSet::new();
    for (w, tree) in trees.iter().enumerate() {
        assert!(tree.verify_running_intersection());
        for vid in tree.vertices() {
            assert!(seen.insert(vid), "vertex {:?} claimed by two trees", vid);
            assert_eq!(mrf.claimed_by(vid), Some(w as u32));
        }
    }
}

#[test]
fn fully_claimed_graph_starves_gracefully() {
    let model = common::grid_model(3, 3, 2.0);
    let mut rng = StdRng::seed_from_u64(104);
    let mrf = Mrf::from_model(&model, &mut rng);
    let config = config(4, 2);

    for i in 0..9 {
        assert!(mrf.try_claim(VariableId(i), 99));
    }

    // Every seed attempt must fail fast without blocking or erroring.
    let grower = TreeGrower::new(&model, &mrf, 1, &config);
    for i in 0..9 {
        let result = grower.grow(VariableId(i), &mut rng).expect("grow");
        assert!(result.is_none());
    }
    assert_eq!(grower.claim_conflicts(), 9);
}

#[test]
fn treeheight_limits_distance_from_seed() {
    let model = common::grid_model(5, 5, 2.0);
    let mut rng = StdRng::seed_from_u64(105);
    let mrf = Mrf::from_model(&model, &mut rng);
    let config = SamplerConfig {
        treeheight: 2,
        ..config(25, 3)
    };
    let grower = TreeGrower::new(&model, &mrf, 1, &config);

    let tree = grower
        .grow(VariableId(12), &mut rng)
        .expect("grow")
        .expect("seed claim");
    assert!(tree.growth_depth() <= 2);

    // Manhattan distance from the center seed can be at most the height.
    for vid in tree.vertices() {
        let (r, c) = ((vid.0 / 5) as i32, (vid.0 % 5) as i32);
        assert!((r - 2).abs() + (c - 2).abs() <= 2);
    }
}
