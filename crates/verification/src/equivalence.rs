//! Input/output equivalence between an original and a transformed function.
//!
//! Both functions are run on the same generated inputs, each run with fresh memory and a
//! fresh host. Two runs agree when they end the same way (same return value or same exit
//! code), print the same bytes, leave the host in the same state, leave the argument
//! buffers with the same contents, and leave every global of the original with the same
//! value. Globals the transform added are ignored, and so is the host's `rand()` state,
//! which a transform may legitimately advance on its own.
//!
//! Inputs are strings. Every pointer parameter receives its own NUL-terminated copy of
//! the input and every integer parameter receives the input length.

use crate::config::VerificationConfig;
use crate::interpreter::host::Host;
use crate::interpreter::memory::{Memory, Value};
use crate::interpreter::{execute, Outcome, Trace};
use indexmap::IndexMap;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tangle_core::cfg_ir::{FunctionCfg, Provenance};
use tangle_core::eval::Scalar;
use tangle_core::ir::Ty;
use tangle_utils::errors::VerifyError;

/// Everything observable about one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub outcome: Outcome,
    pub output: Vec<u8>,
    pub host_state: Vec<u8>,
    /// Contents of each argument buffer after the run, in parameter order.
    pub arguments: Vec<Vec<u64>>,
    pub globals: IndexMap<String, Scalar>,
    pub trace: Trace,
}

/// One input on which the two functions disagreed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mismatch {
    /// The input, hex encoded.
    pub input: String,
    pub reason: String,
}

/// Results of equivalence testing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquivalenceResults {
    /// Overall testing result
    pub overall_passed: bool,
    /// Number of inputs executed
    pub cases_run: usize,
    /// Inputs on which the original itself faulted; they prove nothing either way
    pub inconclusive: usize,
    /// Executions of injected dead blocks in the transformed function. Always zero for a
    /// correct transform.
    pub dead_block_visits: usize,
    pub mismatches: Vec<Mismatch>,
    /// Total testing time
    pub testing_time: Duration,
}

/// Binds `input` to the parameters of `cfg`, allocating argument buffers in `memory`.
pub fn bind_string_args(
    cfg: &FunctionCfg,
    input: &[u8],
    memory: &mut Memory,
) -> Result<Vec<Value>, VerifyError> {
    cfg.params
        .iter()
        .map(|p| match p.ty {
            Ty::Ptr(_) => Ok(Value::Ptr(memory.alloc_c_string(p.name.clone(), input))),
            Ty::Scalar(ty) => Ok(Value::Int(Scalar::new(input.len() as i128, ty))),
            Ty::Array(..) => Err(VerifyError::Harness(format!(
                "array parameter `{}` cannot be bound to a string",
                p.name
            ))),
        })
        .collect()
}

/// Runs `cfg` on `input` and collects what it did.
pub fn observe<H: Host>(
    cfg: &FunctionCfg,
    input: &[u8],
    mut host: H,
    step_limit: u64,
) -> Result<Observation, VerifyError> {
    let mut memory = Memory::new();
    let args = bind_string_args(cfg, input, &mut memory)?;
    let run = execute(cfg, &args, &mut memory, &mut host, step_limit)?;
    let arguments = args
        .iter()
        .filter_map(|a| match a {
            Value::Ptr(p) => memory.region(p.region).map(|r| r.cells.clone()),
            _ => None,
        })
        .collect();
    Ok(Observation {
        outcome: run.outcome,
        output: host.output().to_vec(),
        host_state: host.state(),
        arguments,
        globals: run.globals,
        trace: run.trace,
    })
}

/// Describes the first observable difference, if any.
fn difference(original: &Observation, transformed: &Observation) -> Option<String> {
    if original.outcome != transformed.outcome {
        return Some(format!(
            "outcome {:?} became {:?}",
            original.outcome, transformed.outcome
        ));
    }
    if original.output != transformed.output {
        return Some(format!(
            "output {:?} became {:?}",
            String::from_utf8_lossy(&original.output),
            String::from_utf8_lossy(&transformed.output)
        ));
    }
    if original.host_state != transformed.host_state {
        return Some("host state differs".into());
    }
    if original.arguments != transformed.arguments {
        return Some("argument memory differs".into());
    }
    original.globals.iter().find_map(|(name, value)| {
        match transformed.globals.get(name) {
            Some(v) if v == value => None,
            other => Some(format!("global `{name}` is {other:?} instead of {value:?}")),
        }
    })
}

/// Differential tester for two versions of one function.
#[derive(Debug, Clone)]
pub struct EquivalenceChecker {
    config: VerificationConfig,
}

impl EquivalenceChecker {
    pub fn new(config: VerificationConfig) -> Result<Self, VerifyError> {
        config.validate()?;
        tracing::info!(
            "Initialized equivalence checker: {} samples, step limit {}",
            config.sample_count,
            config.step_limit
        );
        Ok(Self { config })
    }

    pub const fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Printable ASCII strings with lengths in the configured range, reproducible from the
    /// configured seed.
    pub fn generate_inputs(&self) -> Vec<Vec<u8>> {
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        (0..self.config.sample_count)
            .map(|_| {
                let len = rng.random_range(self.config.min_input_len..=self.config.max_input_len);
                (0..len).map(|_| rng.random_range(0x20u8..0x7f)).collect()
            })
            .collect()
    }

    /// Checks the two functions on generated inputs.
    pub fn check<H, F>(
        &self,
        original: &FunctionCfg,
        transformed: &FunctionCfg,
        make_host: F,
    ) -> Result<EquivalenceResults, VerifyError>
    where
        H: Host,
        F: FnMut() -> H,
    {
        let inputs = self.generate_inputs();
        self.check_inputs(original, transformed, &inputs, make_host)
    }

    /// Checks the two functions on the given inputs.
    pub fn check_inputs<H, F>(
        &self,
        original: &FunctionCfg,
        transformed: &FunctionCfg,
        inputs: &[Vec<u8>],
        mut make_host: F,
    ) -> Result<EquivalenceResults, VerifyError>
    where
        H: Host,
        F: FnMut() -> H,
    {
        let signature = |cfg: &FunctionCfg| cfg.params.iter().map(|p| p.ty).collect::<Vec<_>>();
        if signature(original) != signature(transformed) || original.ret != transformed.ret {
            return Err(VerifyError::Harness(format!(
                "`{}` and `{}` have different signatures",
                original.name, transformed.name
            )));
        }

        let start_time = Instant::now();
        tracing::info!(
            "Checking `{}` against `{}` on {} inputs",
            original.name,
            transformed.name,
            inputs.len()
        );

        let mut results = EquivalenceResults {
            overall_passed: true,
            cases_run: 0,
            inconclusive: 0,
            dead_block_visits: 0,
            mismatches: Vec::new(),
            testing_time: Duration::ZERO,
        };
        for input in inputs {
            results.cases_run += 1;
            let expected = match observe(original, input, make_host(), self.config.step_limit) {
                Ok(o) => o,
                Err(e) => {
                    tracing::debug!("original faulted on {}: {e}", hex::encode(input));
                    results.inconclusive += 1;
                    continue;
                }
            };
            let reason = match observe(transformed, input, make_host(), self.config.step_limit) {
                Ok(actual) => {
                    results.dead_block_visits +=
                        actual.trace.visits_with(transformed, Provenance::Dead);
                    difference(&expected, &actual)
                }
                Err(e) => Some(format!("transformed function faulted: {e}")),
            };
            if let Some(reason) = reason {
                tracing::warn!("mismatch on {}: {reason}", hex::encode(input));
                results.mismatches.push(Mismatch {
                    input: hex::encode(input),
                    reason,
                });
            }
        }
        results.overall_passed = results.mismatches.is_empty() && results.dead_block_visits == 0;
        results.testing_time = start_time.elapsed();
        tracing::info!(
            "{} of {} inputs agree ({} inconclusive) in {:.2}s",
            results.cases_run - results.mismatches.len() - results.inconclusive,
            results.cases_run,
            results.inconclusive,
            results.testing_time.as_secs_f64()
        );
        Ok(results)
    }
}
