//! Parallel obfuscation of independent functions.
//!
//! Each function runs the whole pipeline on a blocking worker thread. A semaphore bounds
//! the number of workers in flight. Functions share nothing, so the only coordination is
//! putting results back in input order.

use crate::obfuscator::{obfuscate, ObfuscationConfig, ObfuscationResult};
use sha3::{Digest, Keccak256};
use std::sync::Arc;
use tangle_core::cfg_ir::FunctionCfg;
use tangle_utils::errors::{ObfuscateError, TransformError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

/// Seed for one function of a batch, so that a function's output does not depend on
/// which other functions share the batch.
pub fn function_seed(seed: u64, function: &str) -> u64 {
    let mut hasher = Keccak256::new();
    hasher.update(seed.to_le_bytes());
    hasher.update(function.as_bytes());
    let digest: [u8; 32] = hasher.finalize().into();
    let mut word = [0u8; 8];
    word.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(word)
}

/// Obfuscates every function with at most `workers` running at once.
///
/// The result vector is in input order. A failure in one function does not affect the
/// others.
pub async fn obfuscate_batch(
    functions: Vec<FunctionCfg>,
    config: Arc<ObfuscationConfig>,
    workers: usize,
) -> Vec<Result<ObfuscationResult, ObfuscateError>> {
    let total = functions.len();
    let permits = Arc::new(Semaphore::new(workers.max(1)));
    let mut set = JoinSet::new();

    for (index, cfg) in functions.into_iter().enumerate() {
        let permits = Arc::clone(&permits);
        let config = Arc::clone(&config);
        set.spawn(async move {
            let _permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    let error = TransformError::Worker(e.to_string());
                    return (index, Err(ObfuscateError::from(error)));
                }
            };
            let result = tokio::task::spawn_blocking(move || {
                let mut config = (*config).clone();
                config.seed = function_seed(config.seed, &cfg.name);
                debug!("worker {index}: `{}` with seed 0x{:x}", cfg.name, config.seed);
                obfuscate(&cfg, &config)
            })
            .await
            .unwrap_or_else(|e| Err(ObfuscateError::from(TransformError::Worker(e.to_string()))));
            (index, result)
        });
    }

    let mut slots: Vec<Option<Result<ObfuscationResult, ObfuscateError>>> =
        (0..total).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => {
                if let Err(e) = &result {
                    error!("function #{index} failed: {e}");
                }
                slots[index] = Some(result);
            }
            Err(e) => error!("batch task failed: {e}"),
        }
    }
    slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| {
                Err(ObfuscateError::from(TransformError::Worker(
                    "task ended without a result".into(),
                )))
            })
        })
        .collect()
}
