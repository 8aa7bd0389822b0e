/// Module for the `obfuscate` subcommand, which applies obfuscation passes to function CFGs.
///
/// This module loads one or more function CFGs, runs the configured pass list over them in
/// parallel workers, and writes the obfuscated C source with its variant footer. It can
/// also check every result against its original and write a JSON report.
use async_trait::async_trait;
use clap::Args;
use serde_json::json;
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tangle_transform::batch::obfuscate_batch;
use tangle_transform::obfuscator::{presets, ObfuscationConfig, ObfuscationResult};
use tangle_transform::pass::validate_pipeline;
use tangle_utils::errors::ObfuscateError;
use tangle_verification::{EquivalenceChecker, EquivalenceResults, StdHost, VerificationConfig};

/// Arguments for the `obfuscate` subcommand.
#[derive(Args)]
pub struct ObfuscateArgs {
    /// Function CFGs as JSON files.
    #[arg(required = true)]
    pub inputs: Vec<PathBuf>,
    /// Random seed for pass application (default: 42, or the config file's seed).
    #[arg(long)]
    pub seed: Option<u64>,
    /// Comma-separated pass list, e.g. `loop-unroll=3,deadcode:bug,flatten`.
    #[arg(long, conflicts_with = "preset")]
    pub passes: Option<String>,
    /// Named pass list: light, default, or heavy.
    #[arg(long)]
    pub preset: Option<String>,
    /// JSON file with an ObfuscationConfig; flags override its fields.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Output file (single input) or directory for `<function>.c` and `<function>.json`.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Path to emit a JSON report.
    #[arg(long)]
    pub emit: Option<PathBuf>,
    /// Maximum number of functions transformed at once.
    #[arg(long, default_value_t = 4)]
    pub workers: usize,
    /// Check every result against its original with the interpreter.
    #[arg(long)]
    pub verify: bool,
}

impl ObfuscateArgs {
    /// Resolves the pipeline configuration from the config file and flags.
    pub fn resolve_config(&self) -> Result<ObfuscationConfig, ObfuscateError> {
        let mut config = match &self.config {
            Some(path) => ObfuscationConfig::from_json_file(path)?,
            None => ObfuscationConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(name) = &self.preset {
            config.passes = presets::by_name(name)
                .ok_or_else(|| ObfuscateError::InvalidPass(format!("unknown preset `{name}`")))?;
        }
        if let Some(list) = &self.passes {
            config = config.with_pass_list(list)?;
        }
        validate_pipeline(&config.passes)?;
        Ok(config)
    }
}

/// Executes the `obfuscate` subcommand to apply passes and output obfuscated C.
#[async_trait]
impl super::Command for ObfuscateArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let config = self.resolve_config()?;
        let originals = self
            .inputs
            .iter()
            .map(|p| super::load_cfg(p))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!(
            "Obfuscating {} function(s) with seed 0x{:x}: {}",
            originals.len(),
            config.seed,
            config
                .passes
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );

        let results =
            obfuscate_batch(originals.clone(), Arc::new(config.clone()), self.workers).await;

        let checker = if self.verify {
            Some(EquivalenceChecker::new(VerificationConfig::development())?)
        } else {
            None
        };

        let mut entries = Vec::new();
        let mut failures = 0usize;
        let single = originals.len() == 1;
        for (original, result) in originals.iter().zip(&results) {
            let result = match result {
                Ok(r) => r,
                Err(e) => {
                    failures += 1;
                    eprintln!("❌ {}: {e}", original.name);
                    entries.push(json!({ "function": original.name, "error": e.to_string() }));
                    continue;
                }
            };

            let equivalence = match &checker {
                Some(checker) => {
                    let eq = checker.check(original, &result.cfg, StdHost::new)?;
                    if !eq.overall_passed {
                        failures += 1;
                        eprintln!("❌ {}: transformed function is not equivalent", original.name);
                    }
                    Some(eq)
                }
                None => None,
            };

            write_result(self.output.as_deref(), single, result)?;
            entries.push(report_entry(result, equivalence.as_ref()));
        }

        if let Some(path) = &self.emit {
            let report = json!({
                "generated_at": chrono::Utc::now().to_rfc3339(),
                "seed": config.seed,
                "passes": config.passes.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "functions": entries,
            });
            fs::write(path, serde_json::to_string_pretty(&report)?)?;
            eprintln!("📊 Wrote report to {}", path.display());
        }

        if failures > 0 {
            return Err(format!("{failures} of {} function(s) failed", results.len()).into());
        }
        eprintln!("✅ Obfuscation complete");
        Ok(())
    }
}

/// Writes one result: to stdout without `--output`, to the file itself for a single input
/// whose output is not a directory, and as `<function>.c` plus `<function>.json` otherwise.
fn write_result(
    output: Option<&Path>,
    single: bool,
    result: &ObfuscationResult,
) -> Result<(), ObfuscateError> {
    match output {
        None => print!("{}", result.source),
        Some(path) if single && !path.is_dir() => fs::write(path, &result.source)?,
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let name = &result.metadata.function;
            fs::write(dir.join(format!("{name}.c")), &result.source)?;
            fs::write(
                dir.join(format!("{name}.json")),
                serde_json::to_string_pretty(&result.cfg)?,
            )?;
        }
    }
    Ok(())
}

/// Generates the JSON report entry for one function.
fn report_entry(
    result: &ObfuscationResult,
    equivalence: Option<&EquivalenceResults>,
) -> serde_json::Value {
    let before = &result.metadata.before;
    let after = &result.metadata.after;
    json!({
        "function": result.metadata.function,
        "seed": result.metadata.seed_used,
        "entropy": result.metadata.entropy,
        "variants": result.manifest.variants(),
        "expanded_variants": result.manifest.expanded(),
        "blocks": { "before": before.block_cnt, "after": after.block_cnt },
        "statements": { "before": before.stmt_cnt, "after": after.stmt_cnt },
        "dispatch_width": after.dispatch_width,
        "dead_blocks": after.dead_cnt,
        "potency_delta": after.potency - before.potency,
        "equivalence": equivalence,
    })
}
