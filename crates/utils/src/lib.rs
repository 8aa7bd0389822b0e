//! Shared error types for the tangle workspace.

pub mod errors;
