use crate::fixtures;
use crate::harness::{assert_equivalent, run, transform};
use tangle_core::cfg_ir::FunctionCfg;
use tangle_core::emit::{emit_function, EmitOptions};
use tangle_core::eval::Scalar;
use tangle_core::ir::ScalarTy;
use tangle_verification::{EquivalenceReport, Outcome, VerificationConfig};

#[test]
fn bkdr_on_test_after_unroll_then_flatten() {
    let expected = fixtures::bkdr_reference(b"test");
    for magic in [fixtures::BKDR_MAGIC, expected] {
        let original = fixtures::bkdr_hash_with_magic(magic).unwrap();
        let (transformed, _) = transform(&original, "loop-unroll=3,flatten", 42);

        let before = run(&original, b"test");
        let after = run(&transformed, b"test");
        assert_eq!(
            after.outcome,
            Outcome::Returned(Some(Scalar::new(i128::from(expected), ScalarTy::U32)))
        );
        assert_eq!(before.outcome, after.outcome);
        assert_eq!(before.output, after.output);
        let banner: &[u8] = if magic == expected { b"You win!\n" } else { b"" };
        assert_eq!(after.output, banner);
    }
}

#[test]
fn transformed_function_reparses_and_stays_equivalent() {
    for original in fixtures::string_benchmarks().unwrap() {
        let (flat, _) = transform(&original, "loop-unroll=2,deadcode,flatten:switch", 17);
        let json = serde_json::to_string(&flat).unwrap();
        let reparsed: FunctionCfg = serde_json::from_str(&json).unwrap();
        assert_eq!(serde_json::to_string(&reparsed).unwrap(), json);
        assert_eq!(
            emit_function(&reparsed, &EmitOptions::default()),
            emit_function(&flat, &EmitOptions::default())
        );
        assert_equivalent(&original, &reparsed);

        // An unflattened result is valid input for another full run.
        let (partial, _) = transform(&original, "loop-unroll=2,block-fission", 17);
        let reparsed: FunctionCfg =
            serde_json::from_str(&serde_json::to_string(&partial).unwrap()).unwrap();
        let (twice, _) = transform(&reparsed, "deadcode,flatten", 18);
        assert_equivalent(&original, &twice);
    }
}

#[test]
fn report_hashes_both_functions() {
    let original = fixtures::djb_hash().unwrap();
    let (transformed, _) = transform(&original, "irrelevant-code,flatten", 3);
    let config = VerificationConfig::development();
    let results = crate::harness::check(&original, &transformed, tangle_verification::StdHost::new);
    let report = EquivalenceReport::new(&original, &transformed, &config, results).unwrap();
    assert!(report.overall_passed());
    assert_ne!(report.original_hash, report.transformed_hash);
    assert!(report.summary().starts_with("Equivalence PASSED - `djb_hash`"));
}
