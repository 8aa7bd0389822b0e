//! Benchmark programs and cross-crate scenario tests for the tangle workspace.

pub mod fixtures;

#[cfg(test)]
mod model;
#[cfg(test)]
mod transforms;
#[cfg(test)]
mod verification;

#[cfg(test)]
pub(crate) mod harness {
    use tangle_core::cfg_ir::FunctionCfg;
    use tangle_transform::pass::{self, parse_pass_list, PassManifest};
    use tangle_transform::PassConfig;
    use tangle_verification::equivalence::observe;
    use tangle_verification::{
        EquivalenceChecker, EquivalenceResults, Host, Observation, StdHost, VerificationConfig,
    };

    pub(crate) const STEPS: u64 = 1_000_000;

    pub(crate) fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    }

    pub(crate) fn run(cfg: &FunctionCfg, input: &[u8]) -> Observation {
        observe(cfg, input, StdHost::new(), STEPS).unwrap()
    }

    /// Runs a compact pass list over a copy of `cfg`.
    pub(crate) fn transform(
        cfg: &FunctionCfg,
        passes: &str,
        seed: u64,
    ) -> (FunctionCfg, PassManifest) {
        let passes = parse_pass_list(passes).unwrap();
        let mut out = cfg.clone();
        let manifest = pass::run(&mut out, &passes, &PassConfig::default(), seed).unwrap();
        (out, manifest)
    }

    /// Development-sized differential check plus a few fixed inputs.
    pub(crate) fn check<H: Host>(
        original: &FunctionCfg,
        transformed: &FunctionCfg,
        mut make_host: impl FnMut() -> H,
    ) -> EquivalenceResults {
        let checker = EquivalenceChecker::new(VerificationConfig::development()).unwrap();
        let mut inputs = checker.generate_inputs();
        inputs.extend([
            b"".to_vec(),
            b"test".to_vec(),
            b"a1b2".to_vec(),
            b"The quick brown fox".to_vec(),
        ]);
        checker
            .check_inputs(original, transformed, &inputs, &mut make_host)
            .unwrap()
    }

    pub(crate) fn assert_equivalent(original: &FunctionCfg, transformed: &FunctionCfg) {
        let results = check(original, transformed, StdHost::new);
        assert!(
            results.overall_passed,
            "`{}` diverged: {:?}",
            original.name, results.mismatches
        );
        assert_eq!(results.inconclusive, 0);
    }
}
