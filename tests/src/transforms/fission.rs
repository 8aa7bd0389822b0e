use crate::fixtures;
use crate::harness::{assert_equivalent, init_tracing, transform, STEPS};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashSet;
use tangle_core::cfg_ir::FunctionCfg;
use tangle_core::loops::loop_headers;
use tangle_transform::loop_fission::{fission, FissionExit};
use tangle_verification::equivalence::observe;
use tangle_verification::StdHost;

fn expected_indices(n: usize) -> String {
    (0..n).map(|i| format!("{i},")).collect()
}

fn split(exit: FissionExit, split_count: usize, seed: u64) -> FunctionCfg {
    let mut cfg = fixtures::print_indices().unwrap();
    let header = loop_headers(&cfg)[0];
    let mut rng = StdRng::seed_from_u64(seed);
    let entries = fission(&mut cfg, header, split_count, exit, 3, &mut rng).unwrap();
    assert_eq!(entries.len(), split_count);
    cfg.validate().unwrap();
    cfg
}

#[test]
fn counted_chain_covers_each_index_once_in_order() {
    init_tracing();
    for split_count in [2, 4] {
        let cfg = split(FissionExit::Counted, split_count, 11);
        for n in [0, 1, 2, 5, 17] {
            let obs = observe(&cfg, &vec![b'x'; n], StdHost::new(), STEPS).unwrap();
            assert_eq!(String::from_utf8(obs.output).unwrap(), expected_indices(n));
        }
    }
}

#[test]
fn random_chain_covers_each_index_once_whatever_rand_returns() {
    let cfg = split(FissionExit::Random, 4, 11);
    let headers: HashSet<_> = loop_headers(&cfg).into_iter().collect();
    let mut split_points = HashSet::new();
    for host_seed in 1..=16 {
        let obs = observe(&cfg, &[b'x'; 12], StdHost::with_seed(host_seed), STEPS).unwrap();
        assert_eq!(String::from_utf8(obs.output).unwrap(), expected_indices(12));
        let per_loop: Vec<usize> = cfg
            .block_ids()
            .into_iter()
            .filter(|id| headers.contains(id))
            .map(|id| obs.trace.visits(id))
            .collect();
        split_points.insert(per_loop);
    }
    assert!(split_points.len() > 1, "rand() never moved the split point");
}

#[test]
fn fission_preserves_benchmarks() {
    for cfg in fixtures::string_benchmarks().unwrap() {
        for passes in ["loop-fission=3", "loop-fission:random=2"] {
            let (split, manifest) = transform(&cfg, passes, 21);
            assert!(manifest.entries[0].changed, "{passes} on `{}`", cfg.name);
            assert_equivalent(&cfg, &split);
        }
    }
}
