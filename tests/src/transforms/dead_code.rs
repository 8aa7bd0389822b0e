use crate::fixtures;
use crate::harness::{init_tracing, transform};
use tangle_core::cfg_ir::{FunctionCfg, Provenance, Terminator};
use tangle_verification::{EquivalenceChecker, StdHost, VerificationConfig};

fn dead_blocks(cfg: &FunctionCfg) -> usize {
    cfg.blocks_in_order()
        .filter(|(_, b)| b.provenance == Provenance::Dead)
        .count()
}

#[test]
fn dead_blocks_are_never_reached_over_ten_thousand_inputs() {
    init_tracing();
    let original = fixtures::bkdr_hash().unwrap();
    let (transformed, _) = transform(&original, "deadcode:bug,deadcode:plain,deadcode", 0xdead);
    assert!(dead_blocks(&transformed) >= 3);

    let config = VerificationConfig {
        sample_count: 10_000,
        max_input_len: 24,
        ..VerificationConfig::development()
    };
    let results = EquivalenceChecker::new(config)
        .unwrap()
        .check(&original, &transformed, StdHost::new)
        .unwrap();
    assert_eq!(results.cases_run, 10_000);
    assert_eq!(results.dead_block_visits, 0);
    assert!(results.overall_passed, "{:?}", results.mismatches);
}

#[test]
fn bug_payload_ends_in_unreachable() {
    let cfg = fixtures::djb_hash().unwrap();
    let (transformed, manifest) = transform(&cfg, "deadcode:bug", 3);
    assert_eq!(manifest.expanded(), vec!["deadcode:bug".to_string()]);
    for (_, block) in transformed.blocks_in_order() {
        if block.provenance == Provenance::Dead {
            assert_eq!(block.terminator, Terminator::Unreachable);
        }
    }
}

#[test]
fn dead_code_survives_flattening() {
    let original = fixtures::elf_hash().unwrap();
    let (transformed, _) = transform(&original, "deadcode,flatten", 77);
    assert!(dead_blocks(&transformed) >= 1);
    let results = crate::harness::check(&original, &transformed, StdHost::new);
    assert_eq!(results.dead_block_visits, 0);
    assert!(results.overall_passed);
}

#[test]
fn loops_stay_unrollable_after_dead_code() {
    let original = fixtures::bkdr_hash().unwrap();
    for seed in 0..8 {
        let (transformed, manifest) = transform(&original, "deadcode:plain,loop-unroll=2", seed);
        assert!(manifest.entries.iter().all(|e| e.changed), "seed {seed}");
        assert!(transformed
            .blocks_in_order()
            .any(|(_, b)| b.provenance == Provenance::Unrolled));
        crate::harness::assert_equivalent(&original, &transformed);
    }
}
