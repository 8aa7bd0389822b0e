use crate::fixtures::{self, FileHost};
use crate::harness::{run, STEPS};
use tangle_core::cfg_ir::{FunctionCfg, Provenance};
use tangle_core::eval::Scalar;
use tangle_core::ir::ScalarTy;
use tangle_verification::equivalence::observe;
use tangle_verification::Outcome;

fn all_fixtures() -> Vec<FunctionCfg> {
    let mut all = fixtures::string_benchmarks().unwrap();
    all.push(fixtures::array_sum().unwrap());
    all.push(fixtures::save_upper().unwrap());
    all.push(fixtures::print_indices().unwrap());
    all
}

fn returned_u32(value: u32) -> Outcome {
    Outcome::Returned(Some(Scalar::new(i128::from(value), ScalarTy::U32)))
}

#[test]
fn fixtures_round_trip_through_json() {
    for cfg in all_fixtures() {
        let json = serde_json::to_string(&cfg).unwrap();
        let back: FunctionCfg = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cfg);
        assert!(cfg.blocks_in_order().all(|(_, b)| b.provenance == Provenance::Source));
    }
}

#[test]
fn dangling_target_is_rejected_on_load() {
    let cfg = fixtures::djb_hash().unwrap();
    let mut doc = serde_json::to_value(&cfg).unwrap();
    doc["blocks"][0]["terminator"]["next"] = serde_json::json!(99);
    let err = serde_json::from_value::<FunctionCfg>(doc).unwrap_err();
    assert!(err.to_string().contains("bb99"), "{err}");
}

#[test]
fn hash_fixtures_match_native_implementations() {
    for input in [&b""[..], b"test", b"hello world", b"~~~~~~~~~~~~~~~~~~~~"] {
        let bkdr = run(&fixtures::bkdr_hash().unwrap(), input);
        assert_eq!(bkdr.outcome, returned_u32(fixtures::bkdr_reference(input)));
        let elf = run(&fixtures::elf_hash().unwrap(), input);
        assert_eq!(elf.outcome, returned_u32(fixtures::elf_reference(input)));
        let djb = run(&fixtures::djb_hash().unwrap(), input);
        assert_eq!(djb.outcome, returned_u32(fixtures::djb_reference(input)));
    }
}

#[test]
fn bkdr_prints_banner_only_on_magic() {
    let plain = run(&fixtures::bkdr_hash().unwrap(), b"test");
    assert_ne!(fixtures::bkdr_reference(b"test"), fixtures::BKDR_MAGIC);
    assert!(plain.output.is_empty());

    let rigged = fixtures::bkdr_hash_with_magic(fixtures::bkdr_reference(b"test")).unwrap();
    assert_eq!(run(&rigged, b"test").output, b"You win!\n");
    assert!(run(&rigged, b"tess").output.is_empty());
}

#[test]
fn first_digit_breaks_early() {
    let cfg = fixtures::first_digit().unwrap();
    let found = run(&cfg, b"ab7c9");
    assert_eq!(
        found.outcome,
        Outcome::Returned(Some(Scalar::new(2, ScalarTy::I32)))
    );
    let missing = run(&cfg, b"abc");
    assert_eq!(
        missing.outcome,
        Outcome::Returned(Some(Scalar::new(-1, ScalarTy::I32)))
    );
}

#[test]
fn array_sum_uses_local_array() {
    let obs = run(&fixtures::array_sum().unwrap(), b"xyz");
    assert_eq!(
        obs.outcome,
        Outcome::Returned(Some(Scalar::new(28 * 3, ScalarTy::I32)))
    );
}

#[test]
fn file_host_records_writes_and_argument_memory() {
    let cfg = fixtures::save_upper().unwrap();
    let obs = observe(&cfg, b"ab-C", FileHost::new(), STEPS).unwrap();
    assert_eq!(obs.outcome, returned_u32(4));
    assert_eq!(obs.host_state, b"AB-C\x01");
    assert_eq!(obs.globals["written"], Scalar::new(4, ScalarTy::U32));
    let arg: Vec<u8> = obs.arguments[0].iter().map(|c| *c as u8).collect();
    assert_eq!(arg, b"AB-C\0");
}
