use async_trait::async_trait;
use clap::Args;
use std::error::Error;
use std::path::PathBuf;
use tangle_core::emit::{emit_function, EmitOptions};

#[derive(Args)]
pub struct EmitArgs {
    /// Function CFG as JSON
    pub input: PathBuf,
    /// Output file for the C source (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
    /// Leave out blocks that cannot be reached from the entry
    #[arg(long)]
    pub prune: bool,
    /// Omit the #include lines
    #[arg(long)]
    pub no_preamble: bool,
}

#[async_trait]
impl super::Command for EmitArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let cfg = super::load_cfg(&self.input)?;
        let opts = EmitOptions {
            prune_unreachable: self.prune,
            preamble: !self.no_preamble,
        };
        super::write_or_print(self.output.as_deref(), &emit_function(&cfg, &opts))?;
        Ok(())
    }
}
