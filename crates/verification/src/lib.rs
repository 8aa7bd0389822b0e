//! Tangle Verification Engine
//!
//! Checks that an obfuscated function behaves exactly like its original by running both
//! through a reference interpreter on the same inputs:
//!
//! 1. **Interpreter**: C integer semantics, region-based memory, pluggable host functions,
//!    and an instrumented trace of visited blocks and dispatch states
//! 2. **Equivalence**: differential testing over generated string inputs

pub mod config;
pub mod equivalence;
pub mod interpreter;
pub mod report;

pub use config::{VerificationConfig, VerificationLevel};
pub use equivalence::{EquivalenceChecker, EquivalenceResults, Mismatch, Observation};
pub use interpreter::host::{Host, HostOutcome, StdHost};
pub use interpreter::memory::{Memory, Pointer, Value};
pub use interpreter::{execute, Execution, Outcome, Trace};
pub use report::EquivalenceReport;
