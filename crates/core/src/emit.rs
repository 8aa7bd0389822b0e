//! Renders a [`FunctionCfg`] as GNU C source text.
//!
//! Every block becomes a label followed by its statements and a `goto`-based rendering of
//! its terminator. Blocks that appear in a dispatch table are labelled `<fn>_lab<state>`;
//! all others are labelled `<fn>_bb<id>`. An indirect-goto dispatcher is written as a local
//! `void *<fn>_jumpTab[N]` filled with label addresses at function entry, and every
//! transfer into the dispatcher is inlined as `goto *(<fn>_jumpTab[state]);`. A switch
//! dispatcher is written as an exhaustive `switch` whose default is unreachable.

use crate::cfg_ir::{Block, BlockId, DispatchMode, FunctionCfg, Terminator};
use crate::ir::{Expr, Ty};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt::Write;

/// Emitter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmitOptions {
    /// Drop blocks with no path from the entry. Cosmetic only.
    pub prune_unreachable: bool,
    /// Emit the standard `#include` lines before the globals.
    pub preamble: bool,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            prune_unreachable: false,
            preamble: true,
        }
    }
}

struct Labels {
    names: HashMap<BlockId, String>,
    tables: HashMap<BlockId, String>,
}

impl Labels {
    fn new(cfg: &FunctionCfg) -> Self {
        let mut names = HashMap::new();
        let mut tables = HashMap::new();
        for (id, block) in cfg.blocks_in_order() {
            if let Terminator::Dispatch { table, .. } = &block.terminator {
                let name = if tables.is_empty() {
                    format!("{}_jumpTab", cfg.name)
                } else {
                    format!("{}_jumpTab{}", cfg.name, tables.len())
                };
                tables.insert(id, name);
                for (state, target) in table.iter().enumerate() {
                    names
                        .entry(*target)
                        .or_insert_with(|| format!("{}_lab{state}", cfg.name));
                }
            }
        }
        for id in cfg.block_ids() {
            names
                .entry(id)
                .or_insert_with(|| format!("{}_bb{}", cfg.name, id.0));
        }
        Self { names, tables }
    }

    fn of(&self, id: BlockId) -> &str {
        self.names.get(&id).map_or("", String::as_str)
    }
}

/// Emits the full translation unit for one function: preamble, globals, and definition.
pub fn emit_function(cfg: &FunctionCfg, opts: &EmitOptions) -> String {
    let mut out = String::new();
    if opts.preamble {
        out.push_str("#include <stdio.h>\n#include <stdlib.h>\n\n");
    }
    for (name, global) in &cfg.globals {
        let init = Expr::Const {
            bits: global.init,
            ty: global.ty,
        };
        let _ = writeln!(out, "{} = {init};", Ty::Scalar(global.ty).declare(name));
    }
    if !cfg.globals.is_empty() {
        out.push('\n');
    }

    let ret = cfg.ret.map_or("void", |t| t.c_name());
    let params: Vec<String> = cfg.params.iter().map(|p| p.ty.declare(&p.name)).collect();
    let params = if params.is_empty() {
        "void".to_string()
    } else {
        params.join(", ")
    };
    let _ = writeln!(out, "{ret} {}({params})\n{{", cfg.name);

    let labels = Labels::new(cfg);
    let reachable = cfg.reachable();
    let emitted: Vec<(BlockId, &Block)> = cfg
        .blocks_in_order()
        .filter(|(id, _)| !opts.prune_unreachable || reachable.contains(id))
        .collect();

    for (name, ty) in &cfg.locals {
        let _ = writeln!(out, "  {};", ty.declare(name));
    }
    for (id, block) in &emitted {
        if let Terminator::Dispatch { table, mode, .. } = &block.terminator {
            if *mode == DispatchMode::IndirectGoto {
                let _ = writeln!(out, "  void *{}[{}];", labels.tables[id], table.len());
            }
        }
    }
    out.push('\n');
    for (id, block) in &emitted {
        if let Terminator::Dispatch {
            table,
            mode: DispatchMode::IndirectGoto,
            ..
        } = &block.terminator
        {
            for (state, target) in table.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "  {}[{state}] = &&{};",
                    labels.tables[id],
                    labels.of(*target)
                );
            }
        }
    }

    let mut referenced: HashSet<BlockId> = emitted
        .iter()
        .flat_map(|(_, b)| b.terminator.successors())
        .collect();
    let first = emitted.first().map(|(id, _)| *id);
    if first != Some(cfg.entry()) {
        let _ = writeln!(out, "  goto {};", labels.of(cfg.entry()));
        referenced.insert(cfg.entry());
    }

    for (pos, (id, block)) in emitted.iter().enumerate() {
        if referenced.contains(id) {
            let _ = writeln!(out, "{}: ;", labels.of(*id));
        }
        for stmt in &block.stmts {
            let _ = writeln!(out, "  {stmt}");
        }
        let next = emitted.get(pos + 1).map(|(n, _)| *n);
        emit_terminator(&mut out, cfg, &labels, *id, &block.terminator, next);
    }
    out.push_str("}\n");
    out
}

fn jump(out: &mut String, cfg: &FunctionCfg, labels: &Labels, target: BlockId) {
    // Transfers into an empty indirect-goto dispatcher jump through the table directly.
    if let Some(Block {
        stmts,
        terminator:
            Terminator::Dispatch {
                state,
                mode: DispatchMode::IndirectGoto,
                ..
            },
        ..
    }) = cfg.block(target)
    {
        if stmts.is_empty() {
            let _ = writeln!(out, "  goto *({}[{state}]);", labels.tables[&target]);
            return;
        }
    }
    let _ = writeln!(out, "  goto {};", labels.of(target));
}

fn condition(cond: &Expr) -> String {
    match cond {
        Expr::Binary { .. } | Expr::Unary { .. } | Expr::Select { .. } | Expr::Load { .. } => {
            cond.to_string()
        }
        _ => format!("({cond})"),
    }
}

fn emit_terminator(
    out: &mut String,
    cfg: &FunctionCfg,
    labels: &Labels,
    id: BlockId,
    terminator: &Terminator,
    next: Option<BlockId>,
) {
    match terminator {
        Terminator::Fallthrough { next: to } => {
            if Some(*to) != next || cfg.block(*to).is_some_and(|b| b.terminator.is_dispatch()) {
                jump(out, cfg, labels, *to);
            }
        }
        Terminator::Branch {
            cond,
            then_to,
            else_to,
        } => {
            let _ = writeln!(out, "  if {} goto {};", condition(cond), labels.of(*then_to));
            if Some(*else_to) != next {
                jump(out, cfg, labels, *else_to);
            }
        }
        Terminator::Return { value: Some(v) } => {
            let _ = writeln!(out, "  return {v};");
        }
        Terminator::Return { value: None } => out.push_str("  return;\n"),
        Terminator::Unreachable => out.push_str("  __builtin_unreachable();\n"),
        Terminator::Dispatch { state, table, mode } => match mode {
            DispatchMode::IndirectGoto => {
                let _ = writeln!(out, "  goto *({}[{state}]);", labels.tables[&id]);
            }
            DispatchMode::Switch => {
                let _ = writeln!(out, "  switch ({state}) {{");
                for (k, target) in table.iter().enumerate() {
                    let _ = writeln!(out, "  case {k}: goto {};", labels.of(*target));
                }
                out.push_str("  default: __builtin_unreachable();\n  }\n");
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg_ir::FunctionBuilder;
    use crate::ir::{ScalarTy, Stmt};

    fn sample() -> FunctionCfg {
        let mut b = FunctionBuilder::new("f");
        b.param("n", Ty::Scalar(ScalarTy::I32))
            .returns(ScalarTy::I32)
            .global("_entropy", ScalarTy::U64, 4465652213940039705);
        b.local("buf", Ty::Array(ScalarTy::I8, 10));
        let a = b.reserve();
        let yes = b.reserve();
        let no = b.reserve();
        b.block(
            a,
            vec![],
            Terminator::branch(Expr::lt(Expr::var("n"), Expr::i32(3)), yes, no),
        );
        b.block(no, vec![], Terminator::ret(Some(Expr::i32(0))));
        b.block(
            yes,
            vec![Stmt::eval(Expr::call("puts", vec![Expr::str("hi")]))],
            Terminator::ret(Some(Expr::var("n"))),
        );
        b.finish().unwrap()
    }

    #[test]
    fn emits_labels_and_gotos() {
        let text = emit_function(&sample(), &EmitOptions::default());
        assert!(text.starts_with("#include <stdio.h>\n"));
        assert!(text.contains("unsigned long _entropy = 4465652213940039705UL;\n"));
        assert!(text.contains("int f(int n)\n{\n"));
        assert!(text.contains("  char buf[10];\n"));
        assert!(text.contains("  if (n < 3) goto f_bb1;\n"));
        assert!(text.contains("f_bb1: ;\n  puts(\"hi\");\n  return n;\n"));
        assert!(!text.contains("f_bb0: ;"));
        assert!(text.ends_with("}\n"));
    }
}
