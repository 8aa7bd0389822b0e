//! Subcommands of the `tangle` binary.

pub mod commands;
