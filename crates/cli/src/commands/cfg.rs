use async_trait::async_trait;
use clap::Args;
use std::error::Error;
use std::fmt::Write;
use std::path::PathBuf;
use tangle_core::cfg_ir::{EdgeType, FunctionCfg};

#[derive(Args)]
pub struct CfgArgs {
    /// Function CFG as JSON
    pub input: PathBuf,
    /// Output file for Graphviz .dot (default: stdout)
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[async_trait]
impl super::Command for CfgArgs {
    async fn execute(self) -> Result<(), Box<dyn Error>> {
        let cfg = super::load_cfg(&self.input)?;
        super::write_or_print(self.output.as_deref(), &generate_dot(&cfg))?;
        Ok(())
    }
}

/// Escapes text for a double-quoted dot label.
fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

pub fn generate_dot(cfg: &FunctionCfg) -> String {
    let graph = cfg.to_graph();
    let mut dot = format!("digraph \"{}\" {{\n    node [shape=box];\n", escape(&cfg.name));

    // Add nodes
    for node in graph.graph.node_indices() {
        let id = graph.graph[node];
        let Some(block) = cfg.block(id) else {
            continue;
        };
        let mut label = format!("{id} ({:?})", block.provenance);
        if id == cfg.entry() {
            label.push_str(" entry");
        }
        for stmt in &block.stmts {
            let _ = write!(label, "\\l{}", escape(&stmt.to_string()));
        }
        label.push_str("\\l");
        let _ = writeln!(dot, "    {} [label=\"{label}\"];", node.index());
    }

    // Add edges
    for edge in graph.graph.edge_indices() {
        let Some((src, dst)) = graph.graph.edge_endpoints(edge) else {
            continue;
        };
        let label = match graph.graph[edge] {
            EdgeType::Fallthrough => "Fallthrough",
            EdgeType::BranchTrue => "BranchTrue",
            EdgeType::BranchFalse => "BranchFalse",
            EdgeType::Dispatch => "Dispatch",
        };
        let _ = writeln!(
            dot,
            "    {} -> {} [label=\"{label}\"];",
            src.index(),
            dst.index()
        );
    }

    dot.push_str("}\n");
    dot
}
