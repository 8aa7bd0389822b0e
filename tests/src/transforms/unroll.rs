use crate::fixtures;
use crate::harness::{assert_equivalent, init_tracing, run, transform};
use tangle_core::cfg_ir::Provenance;
use tangle_core::loops::{loop_headers, natural_loop};
use tangle_transform::loop_unroll::unroll;

#[test]
fn copies_and_residual_cover_every_iteration() {
    init_tracing();
    for factor in 1..=4usize {
        for len in 0..=2 * factor + 1 {
            let mut cfg = fixtures::bkdr_hash().unwrap();
            let header = loop_headers(&cfg)[0];
            let body = natural_loop(&cfg, header).unwrap().body_entry;
            let guards = unroll(&mut cfg, header, factor).unwrap();
            assert_eq!(guards.len(), factor);

            let input = vec![b'q'; len];
            let obs = run(&cfg, &input);
            let copies = obs
                .trace
                .blocks
                .iter()
                .filter(|b| !guards.contains(b))
                .filter(|b| cfg.get(**b).unwrap().provenance == Provenance::Unrolled)
                .count();
            let residual = obs.trace.visits(body);

            assert_eq!(copies + residual, len, "factor {factor}, length {len}");
            assert_eq!(copies, len.min(factor), "factor {factor}, length {len}");
            assert_eq!(obs.outcome, run(&fixtures::bkdr_hash().unwrap(), &input).outcome);
        }
    }
}

#[test]
fn unrolls_multi_block_bodies() {
    for cfg in [fixtures::elf_hash().unwrap(), fixtures::array_sum().unwrap()] {
        let (unrolled, manifest) = transform(&cfg, "loop-unroll=3", 5);
        assert!(manifest.entries[0].changed);
        assert!(unrolled.block_count() > cfg.block_count());
        assert_equivalent(&cfg, &unrolled);
    }
}

#[test]
fn loop_with_break_keeps_its_early_exit() {
    let cfg = fixtures::first_digit().unwrap();
    let (unrolled, _) = transform(&cfg, "loop-unroll=2", 9);
    assert_equivalent(&cfg, &unrolled);
}
