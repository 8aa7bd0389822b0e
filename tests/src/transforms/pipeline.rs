use crate::fixtures::{self, FileHost};
use crate::harness::{assert_equivalent, check, init_tracing, transform};
use std::sync::Arc;
use tangle_core::cfg_ir::{FunctionBuilder, Terminator};
use tangle_core::ir::{Expr, ScalarTy, Stmt, Ty};
use tangle_transform::batch::obfuscate_batch;
use tangle_transform::obfuscator::{obfuscate, presets, ObfuscationConfig};
use tangle_transform::pass::{self, parse_pass_list};
use tangle_transform::PassConfig;
use tangle_utils::errors::TransformError;

#[test]
fn presets_preserve_every_benchmark() {
    init_tracing();
    let mut functions = fixtures::string_benchmarks().unwrap();
    functions.push(fixtures::array_sum().unwrap());
    for name in ["light", "default", "heavy"] {
        for original in &functions {
            let config = ObfuscationConfig {
                seed: 0x5eed,
                passes: presets::by_name(name).unwrap(),
                ..Default::default()
            };
            let result = obfuscate(original, &config).unwrap();
            assert_equivalent(original, &result.cfg);
        }
    }
}

#[test]
fn mocked_file_io_survives_heavy_preset() {
    let original = fixtures::save_upper().unwrap();
    let config = ObfuscationConfig {
        passes: presets::heavy(),
        ..Default::default()
    };
    let result = obfuscate(&original, &config).unwrap();
    let results = check(&original, &result.cfg, FileHost::new);
    assert!(results.overall_passed, "{:?}", results.mismatches);
}

#[test]
fn footer_lists_flatten_first_then_run_order() {
    let original = fixtures::bkdr_hash().unwrap();
    let config = ObfuscationConfig::default()
        .with_pass_list("loop-fission:random=2, loop-unroll=3, deadcode:bug, flatten:switch")
        .unwrap();
    let result = obfuscate(&original, &config).unwrap();
    assert!(result.source.ends_with(
        "// variants: flatten, loop-fission, loop-unroll, deadcode\n\
         // expanded variants: flatten:switch, loop-fission:random, loop-unroll, deadcode:bug\n"
    ));
    assert_equivalent(&original, &result.cfg);
}

#[test]
fn footer_omits_passes_that_found_nothing() {
    let mut b = FunctionBuilder::new("scale");
    b.param("n", Ty::Scalar(ScalarTy::U32)).returns(ScalarTy::U32);
    b.local("r", Ty::Scalar(ScalarTy::U32));
    let entry = b.reserve();
    b.block(
        entry,
        vec![
            Stmt::assign("r", Expr::mul(Expr::var("n"), Expr::u32(3))),
            Stmt::assign("r", Expr::add(Expr::var("r"), Expr::u32(1))),
        ],
        Terminator::ret(Some(Expr::var("r"))),
    );
    let original = b.finish().unwrap();

    let passes = "loop-unroll,loop-fission,irrelevant-code,flatten";
    let (flat, manifest) = transform(&original, passes, 4);
    assert_eq!(manifest.entries.len(), 4);
    assert!(!manifest.entries[0].changed && !manifest.entries[1].changed);
    assert_eq!(
        manifest.footer(),
        "// variants: flatten, irrelevant-code\n\
         // expanded variants: flatten:indirect-goto, irrelevant-code\n"
    );
    assert_equivalent(&original, &flat);
}

#[test]
fn rejected_pipelines_leave_the_function_untouched() {
    let original = fixtures::djb_hash().unwrap();
    let mut cfg = original.clone();

    let passes = parse_pass_list("flatten,deadcode").unwrap();
    let err = pass::run(&mut cfg, &passes, &PassConfig::default(), 1).unwrap_err();
    assert_eq!(
        err,
        TransformError::PassOrderViolation {
            pass: "deadcode",
            position: 1
        }
    );
    assert_eq!(cfg, original);

    for bad in ["loop-unroll=0", "loop-fission=1", "flatten:sideways", "shuffle"] {
        let err = parse_pass_list(bad)
            .and_then(|p| pass::run(&mut cfg, &p, &PassConfig::default(), 1))
            .unwrap_err();
        assert!(
            matches!(err, TransformError::InvalidParameter { .. }),
            "{bad}: {err}"
        );
        assert_eq!(cfg, original);
    }
}

#[test]
fn same_seed_same_output() {
    let original = fixtures::elf_hash().unwrap();
    let config = ObfuscationConfig {
        passes: presets::heavy(),
        ..Default::default()
    };
    let a = obfuscate(&original, &config).unwrap();
    let b = obfuscate(&original, &config).unwrap();
    assert_eq!(a.source, b.source);

    let other = ObfuscationConfig { seed: 43, ..config };
    assert_ne!(obfuscate(&original, &other).unwrap().source, a.source);
}

#[test]
fn config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tangle.json");
    let config = ObfuscationConfig {
        seed: 99,
        passes: presets::heavy(),
        pass_config: PassConfig {
            permute_states: false,
            ..Default::default()
        },
        ..Default::default()
    };
    std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
    assert_eq!(ObfuscationConfig::from_json_file(&path).unwrap(), config);

    std::fs::write(&path, r#"{ "seed": 5 }"#).unwrap();
    let sparse = ObfuscationConfig::from_json_file(&path).unwrap();
    assert_eq!(sparse.seed, 5);
    assert_eq!(sparse.passes, presets::default());
}

#[tokio::test]
async fn batch_keeps_input_order_and_equivalence() {
    let functions = fixtures::string_benchmarks().unwrap();
    let results = obfuscate_batch(
        functions.clone(),
        Arc::new(ObfuscationConfig::default()),
        3,
    )
    .await;
    assert_eq!(results.len(), functions.len());
    for (original, result) in functions.iter().zip(results) {
        let result = result.unwrap();
        assert_eq!(result.metadata.function, original.name);
        assert_equivalent(original, &result.cfg);
    }
}
