//! Core data model of the tangle control-flow obfuscator.
//!
//! Holds the typed statement IR, the per-function CFG with its editing helpers, C-like
//! evaluation used for constant folding, natural-loop analysis, and the C text emitter.

pub mod cfg_ir;
pub mod emit;
pub mod eval;
pub mod ir;
pub mod loops;
