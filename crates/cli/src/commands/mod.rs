use async_trait::async_trait;
use clap::Subcommand;
use std::error::Error;
use std::fs;
use std::path::Path;
use tangle_core::cfg_ir::FunctionCfg;
use tangle_utils::errors::ObfuscateError;

pub mod cfg;
pub mod emit;
pub mod obfuscate;
pub mod verify;

#[derive(Subcommand)]
pub enum Cmd {
    /// Apply obfuscation passes to one or more function CFGs
    Obfuscate(obfuscate::ObfuscateArgs),

    /// Print a function CFG as C source
    Emit(emit::EmitArgs),

    /// Write a function CFG as Graphviz .dot to stdout or a file
    Cfg(cfg::CfgArgs),

    /// Check two versions of a function for input/output equivalence
    Verify(verify::VerifyArgs),
}

#[async_trait]
pub trait Command {
    async fn execute(self) -> Result<(), Box<dyn Error>>;
}

#[async_trait]
impl Command for Cmd {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        match self {
            Cmd::Obfuscate(args) => args.execute().await,
            Cmd::Emit(args) => args.execute().await,
            Cmd::Cfg(args) => args.execute().await,
            Cmd::Verify(args) => args.execute().await,
        }
    }
}

/// Reads a function CFG from a JSON file. The CFG is validated while it is parsed.
pub fn load_cfg(path: &Path) -> Result<FunctionCfg, ObfuscateError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

/// Writes `text` to `output`, or to stdout when no path is given.
pub(crate) fn write_or_print(output: Option<&Path>, text: &str) -> Result<(), ObfuscateError> {
    match output {
        Some(path) => fs::write(path, text)?,
        None => print!("{text}"),
    }
    Ok(())
}
