//! Persistable record of an equivalence check.

use crate::config::VerificationConfig;
use crate::equivalence::EquivalenceResults;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use tangle_core::cfg_ir::FunctionCfg;
use tangle_utils::errors::VerifyError;

/// Which two functions were compared and what came out of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquivalenceReport {
    pub function: String,
    /// SHA3-256 of the original function's JSON form
    pub original_hash: String,
    /// SHA3-256 of the transformed function's JSON form
    pub transformed_hash: String,
    pub checked_at: DateTime<Utc>,
    pub config: VerificationConfig,
    pub results: EquivalenceResults,
}

impl EquivalenceReport {
    pub fn new(
        original: &FunctionCfg,
        transformed: &FunctionCfg,
        config: &VerificationConfig,
        results: EquivalenceResults,
    ) -> Result<Self, VerifyError> {
        Ok(Self {
            function: original.name.clone(),
            original_hash: Self::compute_hash(original)?,
            transformed_hash: Self::compute_hash(transformed)?,
            checked_at: Utc::now(),
            config: config.clone(),
            results,
        })
    }

    pub const fn overall_passed(&self) -> bool {
        self.results.overall_passed
    }

    /// Get a summary string of the verification
    pub fn summary(&self) -> String {
        let status = if self.overall_passed() { "PASSED" } else { "FAILED" };
        format!(
            "Equivalence {} - `{}`: {} cases, {} mismatches, {} inconclusive, Time: {:.2}s",
            status,
            self.function,
            self.results.cases_run,
            self.results.mismatches.len(),
            self.results.inconclusive,
            self.results.testing_time.as_secs_f64()
        )
    }

    fn compute_hash(cfg: &FunctionCfg) -> Result<String, VerifyError> {
        let json = serde_json::to_vec(cfg).map_err(|e| VerifyError::Harness(e.to_string()))?;
        let mut hasher = Sha3_256::new();
        hasher.update(&json);
        Ok(hex::encode(hasher.finalize()))
    }
}
