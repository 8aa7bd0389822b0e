use async_trait::async_trait;
use clap::{Args, ValueEnum};
use std::error::Error;
use std::path::PathBuf;
use tangle_verification::{EquivalenceChecker, EquivalenceReport, StdHost, VerificationConfig};

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Level {
    Development,
    Standard,
    Thorough,
}

#[derive(Args)]
pub struct VerifyArgs {
    /// Original function CFG as JSON
    pub original: PathBuf,
    /// Transformed function CFG as JSON
    pub transformed: PathBuf,
    /// Verification preset
    #[arg(long, value_enum, default_value_t = Level::Standard)]
    pub level: Level,
    /// Override the preset's number of generated inputs
    #[arg(long)]
    pub samples: Option<usize>,
    /// Override the preset's input seed
    #[arg(long)]
    pub seed: Option<u64>,
    /// Path to write the JSON report
    #[arg(long)]
    pub report: Option<PathBuf>,
}

#[async_trait]
impl super::Command for VerifyArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let original = super::load_cfg(&self.original)?;
        let transformed = super::load_cfg(&self.transformed)?;

        let mut config = match self.level {
            Level::Development => VerificationConfig::development(),
            Level::Standard => VerificationConfig::standard(),
            Level::Thorough => VerificationConfig::thorough(),
        };
        if let Some(samples) = self.samples {
            config.sample_count = samples;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }

        let checker = EquivalenceChecker::new(config.clone())?;
        let results = checker.check(&original, &transformed, StdHost::new)?;
        let report = EquivalenceReport::new(&original, &transformed, &config, results)?;

        for m in report.results.mismatches.iter().take(10) {
            eprintln!("  input {}: {}", m.input, m.reason);
        }
        if let Some(path) = &self.report {
            std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        }
        println!("{}", report.summary());
        if !report.overall_passed() {
            return Err("functions are not equivalent".into());
        }
        Ok(())
    }
}
