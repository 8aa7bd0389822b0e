//! Verification configuration and settings

use serde::{Deserialize, Serialize};
use tangle_utils::errors::VerifyError;

/// Controls how many inputs the equivalence checker tries and how long each run may take
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationConfig {
    /// Level of verification to perform
    pub verification_level: VerificationLevel,

    /// Number of generated inputs per check
    pub sample_count: usize,

    /// Shortest generated input string
    pub min_input_len: usize,

    /// Longest generated input string
    pub max_input_len: usize,

    /// Blocks a single run may execute before it is treated as diverging
    pub step_limit: u64,

    /// Seed for input generation and for the host's `rand()`
    pub seed: u64,
}

/// Different levels of verification thoroughness
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationLevel {
    /// Quick verification for development (minimal testing)
    Quick,
    /// Standard verification for CI (balanced)
    Standard,
    /// Exhaustive verification before publishing a benchmark variant
    Comprehensive,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl VerificationConfig {
    /// Quick verification configuration for development
    pub const fn development() -> Self {
        Self {
            verification_level: VerificationLevel::Quick,
            sample_count: 32,
            min_input_len: 0,
            max_input_len: 8,
            step_limit: 100_000,
            seed: 42,
        }
    }

    /// Standard verification configuration for CI
    pub const fn standard() -> Self {
        Self {
            verification_level: VerificationLevel::Standard,
            sample_count: 1_000,
            min_input_len: 0,
            max_input_len: 32,
            step_limit: 1_000_000,
            seed: 12345,
        }
    }

    /// Thorough configuration: many inputs, long strings
    pub const fn thorough() -> Self {
        Self {
            verification_level: VerificationLevel::Comprehensive,
            sample_count: 10_000,
            min_input_len: 0,
            max_input_len: 128,
            step_limit: 10_000_000,
            seed: 98765,
        }
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), VerifyError> {
        if self.sample_count == 0 {
            return Err(VerifyError::Harness(
                "sample_count must be greater than 0".to_string(),
            ));
        }
        if self.min_input_len > self.max_input_len {
            return Err(VerifyError::Harness(format!(
                "min_input_len {} exceeds max_input_len {}",
                self.min_input_len, self.max_input_len
            )));
        }
        if self.step_limit == 0 {
            return Err(VerifyError::Harness(
                "step_limit must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}
