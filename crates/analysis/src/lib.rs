//! Structural metrics used to report the effect of obfuscation passes.

pub mod metrics;

pub use metrics::{collect_metrics, compare, Metrics};
