use crate::pass::{self, parse_pass_list, PassManifest, PassSpec};
use crate::opaque_predicate::OpaqueConstants;
use crate::PassConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tangle_analysis::{collect_metrics, Metrics};
use tangle_core::cfg_ir::FunctionCfg;
use tangle_core::emit::{emit_function, EmitOptions};
use tangle_utils::errors::{ObfuscateError, TransformError};

/// Configuration for the obfuscation pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObfuscationConfig {
    /// Random seed for deterministic obfuscation
    pub seed: u64,
    /// Passes to apply, in order
    pub passes: Vec<PassSpec>,
    /// Pass configuration for transform behavior
    pub pass_config: PassConfig,
    /// Emitter options for the rendered source
    pub emit: EmitOptions,
}

impl Default for ObfuscationConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            passes: presets::default(),
            pass_config: PassConfig::default(),
            emit: EmitOptions::default(),
        }
    }
}

impl ObfuscationConfig {
    /// Loads a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ObfuscateError> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        pass::validate_pipeline(&config.passes)?;
        Ok(config)
    }

    /// Replaces the pass list with one given in compact syntax.
    pub fn with_pass_list(mut self, list: &str) -> Result<Self, ObfuscateError> {
        self.passes = parse_pass_list(list).map_err(|e| match e {
            TransformError::InvalidParameter { detail, .. } => ObfuscateError::InvalidPass(detail),
            other => ObfuscateError::Transform(other),
        })?;
        Ok(self)
    }
}

/// Result of the obfuscation pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObfuscationResult {
    /// The transformed function
    pub cfg: FunctionCfg,
    /// Emitted C source, footer included
    pub source: String,
    /// Passes that ran and whether they changed anything
    pub manifest: PassManifest,
    /// Metadata about the obfuscation process
    pub metadata: ObfuscationMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObfuscationMetadata {
    /// Name of the transformed function
    pub function: String,
    /// Seed used for the obfuscation
    pub seed_used: u64,
    /// Entropy constant baked into opaque predicates, hex encoded
    pub entropy: String,
    /// Labels of the passes that changed the function
    pub transforms_applied: Vec<String>,
    /// Metrics of the input function
    pub before: Metrics,
    /// Metrics of the transformed function
    pub after: Metrics,
}

/// Main obfuscation pipeline
pub fn obfuscate(
    input: &FunctionCfg,
    config: &ObfuscationConfig,
) -> Result<ObfuscationResult, ObfuscateError> {
    tracing::debug!("Starting obfuscation pipeline:");
    tracing::debug!("  Function: {}", input.name);
    tracing::debug!("  Seed: 0x{:x}", config.seed);
    tracing::debug!("  Passes: {}", config.passes.len());

    let before = collect_metrics(input).map_err(TransformError::from)?;
    let mut cfg = input.clone();
    let manifest = pass::run(&mut cfg, &config.passes, &config.pass_config, config.seed)?;
    let after = collect_metrics(&cfg).map_err(TransformError::from)?;

    tracing::debug!(
        "  Blocks: {} -> {}, statements: {} -> {}",
        before.block_cnt,
        after.block_cnt,
        before.stmt_cnt,
        after.stmt_cnt
    );

    let entropy = OpaqueConstants::from_seed(config.seed).entropy();
    let source = render(&cfg, &manifest, &config.emit);
    Ok(ObfuscationResult {
        metadata: ObfuscationMetadata {
            function: cfg.name.clone(),
            seed_used: config.seed,
            entropy: format!("0x{}", hex::encode(entropy.to_be_bytes())),
            transforms_applied: manifest.expanded(),
            before,
            after,
        },
        cfg,
        source,
        manifest,
    })
}

/// Emits `cfg` as C source followed by the variant footer.
pub fn render(cfg: &FunctionCfg, manifest: &PassManifest, opts: &EmitOptions) -> String {
    let mut source = emit_function(cfg, opts);
    source.push_str(&manifest.footer());
    source
}

/// Ready-made pass lists.
pub mod presets {
    use crate::dead_code::DeadCodeVariant;
    use crate::loop_fission::FissionExit;
    use crate::pass::{PassSpec, DEFAULT_SPLIT_COUNT, DEFAULT_UNROLL_FACTOR};
    use tangle_core::cfg_ir::DispatchMode;

    fn unroll() -> PassSpec {
        PassSpec::LoopUnroll {
            factor: DEFAULT_UNROLL_FACTOR,
            header: None,
        }
    }

    fn deadcode() -> PassSpec {
        PassSpec::Deadcode {
            variant: DeadCodeVariant::Bug,
            insertion_point: None,
        }
    }

    /// Unrolling only; the output stays readable.
    pub fn light() -> Vec<PassSpec> {
        vec![unroll()]
    }

    pub fn default() -> Vec<PassSpec> {
        vec![
            unroll(),
            deadcode(),
            PassSpec::Flatten {
                mode: DispatchMode::IndirectGoto,
            },
        ]
    }

    pub fn heavy() -> Vec<PassSpec> {
        vec![
            PassSpec::IrrelevantCode,
            PassSpec::LoopFission {
                split_count: DEFAULT_SPLIT_COUNT,
                exit: FissionExit::Counted,
                header: None,
            },
            unroll(),
            PassSpec::BlockFission,
            deadcode(),
            PassSpec::Flatten {
                mode: DispatchMode::Switch,
            },
        ]
    }

    /// Looks a preset up by name.
    pub fn by_name(name: &str) -> Option<Vec<PassSpec>> {
        match name {
            "light" => Some(light()),
            "default" => Some(default()),
            "heavy" => Some(heavy()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::validate_pipeline;
    use tangle_core::cfg_ir::{FunctionBuilder, Terminator};
    use tangle_core::ir::{Expr, ScalarTy, Stmt, Ty};

    fn countdown() -> FunctionCfg {
        let mut b = FunctionBuilder::new("countdown");
        b.param("n", Ty::Scalar(ScalarTy::U32)).returns(ScalarTy::U32);
        b.local("i", Ty::Scalar(ScalarTy::U32));
        let entry = b.reserve();
        let header = b.reserve();
        let body = b.reserve();
        let exit = b.reserve();
        b.block(entry, vec![Stmt::assign("i", Expr::u32(0))], Terminator::goto(header));
        b.block(
            header,
            vec![],
            Terminator::branch(Expr::lt(Expr::var("i"), Expr::var("n")), body, exit),
        );
        b.block(
            body,
            vec![Stmt::assign("i", Expr::add(Expr::var("i"), Expr::u32(2)))],
            Terminator::goto(header),
        );
        b.block(exit, vec![], Terminator::ret(Some(Expr::var("i"))));
        b.finish().unwrap()
    }

    #[test]
    fn presets_are_valid_pipelines() {
        for name in ["light", "default", "heavy"] {
            validate_pipeline(&presets::by_name(name).unwrap()).unwrap();
        }
        assert!(presets::by_name("extreme").is_none());
    }

    #[test]
    fn source_ends_with_footer() {
        let result = obfuscate(&countdown(), &ObfuscationConfig::default()).unwrap();
        assert!(result.source.contains("countdown_jumpTab"));
        assert!(result.source.ends_with(
            "}\n// variants: flatten, loop-unroll, deadcode\n\
             // expanded variants: flatten:indirect-goto, loop-unroll, deadcode:bug\n"
        ));
        assert_eq!(result.metadata.entropy.len(), 18);
        assert!(result.metadata.after.block_cnt > result.metadata.before.block_cnt);
    }

    #[test]
    fn config_reads_partial_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"seed": 9, "passes": [{"kind": "loop-unroll", "factor": 2}, {"kind": "flatten"}]}"#,
        )
        .unwrap();
        let config = ObfuscationConfig::from_json_file(&path).unwrap();
        assert_eq!(config.seed, 9);
        assert_eq!(config.passes.len(), 2);
        assert_eq!(config.pass_config, PassConfig::default());
    }

    #[test]
    fn bad_pass_list_is_invalid_pass() {
        let err = ObfuscationConfig::default()
            .with_pass_list("flatten, jumble")
            .unwrap_err();
        assert!(matches!(err, ObfuscateError::InvalidPass(_)));
    }
}
