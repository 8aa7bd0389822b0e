//! Control-flow obfuscation passes and the pipeline that composes them.

pub mod batch;
pub mod block_fission;
pub mod dead_code;
pub mod flatten;
pub mod irrelevant_code;
pub mod loop_fission;
pub mod loop_unroll;
pub mod obfuscator;
pub mod opaque_predicate;
pub mod pass;

use opaque_predicate::OpaqueContext;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use tangle_core::cfg_ir::FunctionCfg;
use tangle_utils::errors::{LoopShapeError, TransformError};

/// Trait for control-flow obfuscation transforms.
pub trait Transform: Send + Sync {
    /// Returns the transform's name for logging and identification.
    fn name(&self) -> &'static str;
    /// Applies the transform to the CFG, returning whether changes were made.
    fn apply(&self, cfg: &mut FunctionCfg, ctx: &mut PassContext) -> Result<bool, TransformError>;
}

/// Configuration for transform passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassConfig {
    /// Ratio of eligible blocks that receive dead code when no insertion point is given
    pub max_dead_ratio: f32,
    /// Ratio of eligible blocks that receive irrelevant statements
    pub max_noise_ratio: f32,
    /// Ratio of eligible blocks split by block fission
    pub max_split_ratio: f32,
    /// Largest iteration budget of a counted fission sub-loop
    pub max_fission_chunk: u32,
    /// Shuffle flattened state ids instead of numbering blocks in order
    pub permute_states: bool,
}

impl Default for PassConfig {
    fn default() -> Self {
        Self {
            max_dead_ratio: 0.3,
            max_noise_ratio: 0.5,
            max_split_ratio: 0.3,
            max_fission_chunk: 4,
            permute_states: true,
        }
    }
}

/// Per-run state threaded through every pass of one pipeline run.
#[derive(Debug)]
pub struct PassContext {
    /// Shared RNG; every random decision of the run draws from it.
    pub rng: StdRng,
    /// Opaque constants fixed for the whole run.
    pub opaque: OpaqueContext,
    pub config: PassConfig,
}

impl PassContext {
    pub fn new(seed: u64, opaque: OpaqueContext, config: PassConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            opaque,
            config,
        }
    }
}

/// Maps a loop analysis failure onto the pass that needed the loop.
pub(crate) fn unsupported(pass: &'static str, err: LoopShapeError) -> TransformError {
    TransformError::UnsupportedConstruct {
        pass,
        reason: err.to_string(),
    }
}

/// Number of blocks to touch given `eligible` candidates and a density ratio. At least one
/// block is selected whenever any is eligible.
pub(crate) fn selection_size(eligible: usize, ratio: f32) -> usize {
    if eligible == 0 {
        return 0;
    }
    let n = ((eligible as f32) * ratio.clamp(0.0, 1.0)).ceil() as usize;
    n.clamp(1, eligible)
}
