use crate::fixtures;
use crate::harness::{assert_equivalent, transform, STEPS};
use std::collections::HashSet;
use tangle_core::cfg_ir::{BlockId, FunctionCfg, Provenance, Terminator};
use tangle_verification::equivalence::observe;
use tangle_verification::{EquivalenceChecker, StdHost, VerificationConfig};

fn dispatch_table(cfg: &FunctionCfg) -> Vec<BlockId> {
    cfg.blocks_in_order()
        .find_map(|(_, b)| match &b.terminator {
            Terminator::Dispatch { table, .. } => Some(table.clone()),
            _ => None,
        })
        .unwrap()
}

#[test]
fn every_dispatched_state_has_a_live_entry() {
    let checker = EquivalenceChecker::new(VerificationConfig::development()).unwrap();
    for original in fixtures::string_benchmarks().unwrap() {
        for passes in ["loop-unroll=2,deadcode,flatten", "deadcode:plain,flatten:switch"] {
            let (cfg, _) = transform(&original, passes, 1234);
            let table = dispatch_table(&cfg);
            let mut seen = HashSet::new();
            for input in checker.generate_inputs() {
                let obs = observe(&cfg, &input, StdHost::new(), STEPS).unwrap();
                assert!(!obs.trace.states.is_empty());
                for state in obs.trace.states {
                    let target = table[usize::try_from(state).unwrap()];
                    let block = cfg.get(target).unwrap();
                    assert_ne!(block.provenance, Provenance::Dead);
                    assert_ne!(block.terminator, Terminator::Unreachable);
                    seen.insert(state);
                }
            }
            assert!(seen.len() > 1);
        }
    }
}

#[test]
fn table_covers_every_block_but_the_dispatcher_and_init() {
    let original = fixtures::elf_hash().unwrap();
    let (cfg, _) = transform(&original, "flatten", 8);
    let table: HashSet<BlockId> = dispatch_table(&cfg).into_iter().collect();
    for (id, block) in cfg.blocks_in_order() {
        if block.provenance == Provenance::Dispatch {
            assert!(!table.contains(&id));
        } else {
            assert!(table.contains(&id), "{id} has no state");
        }
    }
    assert_equivalent(&original, &cfg);
}

#[test]
fn state_permutation_depends_on_seed() {
    let original = fixtures::elf_hash().unwrap();
    let tables: HashSet<Vec<BlockId>> = (0..8)
        .map(|seed| dispatch_table(&transform(&original, "flatten", seed).0))
        .collect();
    assert!(tables.len() > 1);
}
