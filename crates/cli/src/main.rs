/// Entry point for the Tangle CLI, a control-flow obfuscator for C functions.
///
/// This module parses command-line arguments and dispatches to subcommands for obfuscating
/// function CFGs, emitting them as C, drawing them as Graphviz graphs, or checking two
/// versions of a function for equivalence. It initializes logging and handles the main
/// execution flow.
use clap::Parser;
use tangle_cli::commands::{Cmd, Command};
use tracing_subscriber::EnvFilter;

/// Command-line interface for Tangle.
///
/// Tangle reads functions as JSON control-flow graphs, applies semantics-preserving
/// control-flow transforms (loop unrolling and fission, dead code behind opaque
/// predicates, flattening), and writes GNU C.
#[derive(Parser)]
#[command(name = "tangle")]
#[command(about = "Tangle: control-flow obfuscator for C functions")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Log per-block decisions (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Runs the Tangle CLI with the provided arguments.
#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = cli.command.execute().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
