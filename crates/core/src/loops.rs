//! Natural-loop discovery and counted-loop recognition.
//!
//! A back edge is an edge `u -> h` where `h` dominates `u`; the natural loop of `h` is `h`
//! plus every block that reaches a latch `u` without passing through `h`. Loop passes only
//! accept loops whose header ends in a two-way branch with the continue side inside the
//! loop and the exit side outside it. Breaks out of the body are allowed and keep their
//! original targets when a pass copies the body.

use crate::cfg_ir::{BlockId, FunctionCfg, Terminator};
use crate::eval::fold;
use crate::ir::{BinOp, Expr, Stmt, Ty};
use petgraph::algo::dominators::simple_fast;
use petgraph::visit::EdgeRef;
use std::collections::{HashMap, HashSet};
use tangle_utils::errors::LoopShapeError;

/// A single-entry loop with a header exit test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NaturalLoop {
    pub header: BlockId,
    /// Loop blocks other than the header, in emission order.
    pub body: Vec<BlockId>,
    /// Blocks with a back edge to the header.
    pub latches: Vec<BlockId>,
    /// Continue condition tested by the header.
    pub cond: Expr,
    /// Target of the header's true edge.
    pub body_entry: BlockId,
    /// Target of the header's false edge.
    pub exit: BlockId,
}

impl NaturalLoop {
    pub fn contains(&self, id: BlockId) -> bool {
        id == self.header || self.body.contains(&id)
    }

    /// Header followed by the body blocks.
    pub fn blocks(&self) -> Vec<BlockId> {
        std::iter::once(self.header)
            .chain(self.body.iter().copied())
            .collect()
    }
}

/// A natural loop of the shape `while (index < bound) { ...; index = index + step; ... }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountedLoop {
    pub natural: NaturalLoop,
    pub index: String,
    pub bound: Expr,
    pub step: i128,
}

/// Back edges of the CFG as `(latch, header)` pairs. Unreachable blocks are ignored.
pub fn back_edges(cfg: &FunctionCfg) -> Vec<(BlockId, BlockId)> {
    let g = cfg.to_graph();
    let doms = simple_fast(&g.graph, g.entry);
    let mut edges = Vec::new();
    for edge in g.graph.edge_references() {
        let (u, h) = (edge.source(), edge.target());
        let dominated = doms
            .dominators(u)
            .is_some_and(|mut it| it.any(|d| d == h));
        if dominated {
            edges.push((g.graph[u], g.graph[h]));
        }
    }
    edges
}

/// Headers of all natural loops, in emission order.
pub fn loop_headers(cfg: &FunctionCfg) -> Vec<BlockId> {
    let targets: HashSet<BlockId> = back_edges(cfg).into_iter().map(|(_, h)| h).collect();
    cfg.block_ids()
        .into_iter()
        .filter(|id| targets.contains(id))
        .collect()
}

/// Computes the natural loop headed by `header`.
pub fn natural_loop(cfg: &FunctionCfg, header: BlockId) -> Result<NaturalLoop, LoopShapeError> {
    let latches: Vec<BlockId> = back_edges(cfg)
        .into_iter()
        .filter(|(_, h)| *h == header)
        .map(|(u, _)| u)
        .collect();
    if latches.is_empty() {
        return Err(LoopShapeError::NotAHeader(header.0));
    }

    let reachable = cfg.reachable();
    let preds = cfg.predecessors();
    let mut members: HashSet<BlockId> = HashSet::from([header]);
    let mut stack: Vec<BlockId> = latches.clone();
    while let Some(id) = stack.pop() {
        if !reachable.contains(&id) || !members.insert(id) {
            continue;
        }
        if let Some(ps) = preds.get(&id) {
            stack.extend(ps.iter().copied());
        }
    }

    let (cond, then_to, else_to) = match cfg.block(header).map(|b| &b.terminator) {
        Some(Terminator::Branch {
            cond,
            then_to,
            else_to,
        }) => (cond.clone(), *then_to, *else_to),
        _ => return Err(LoopShapeError::NoExitBranch(header.0)),
    };
    if then_to == header || !members.contains(&then_to) {
        return Err(if members.contains(&else_to) {
            LoopShapeError::ConditionShape(header.0)
        } else {
            LoopShapeError::NoExitBranch(header.0)
        });
    }
    if members.contains(&else_to) {
        return Err(LoopShapeError::NoExitBranch(header.0));
    }

    let body = cfg
        .block_ids()
        .into_iter()
        .filter(|id| *id != header && members.contains(id))
        .collect();
    Ok(NaturalLoop {
        header,
        body,
        latches,
        cond,
        body_entry: then_to,
        exit: else_to,
    })
}

/// All well-formed natural loops, innermost first.
pub fn find_loops(cfg: &FunctionCfg) -> Vec<NaturalLoop> {
    let order: HashMap<BlockId, usize> = cfg
        .block_ids()
        .into_iter()
        .enumerate()
        .map(|(i, id)| (id, i))
        .collect();
    let mut loops: Vec<NaturalLoop> = loop_headers(cfg)
        .into_iter()
        .filter_map(|h| natural_loop(cfg, h).ok())
        .collect();
    loops.sort_by_key(|l| (l.body.len(), order.get(&l.header).copied()));
    loops
}

/// Every loop header, including loops [`natural_loop`] rejects.
///
/// Well-formed loops come first, innermost first. Rejected headers follow in emission
/// order so that loop passes report them instead of passing over them.
pub fn loops_innermost_first(cfg: &FunctionCfg) -> Vec<BlockId> {
    let mut headers: Vec<BlockId> = find_loops(cfg).into_iter().map(|l| l.header).collect();
    let rest: Vec<BlockId> = loop_headers(cfg)
        .into_iter()
        .filter(|h| !headers.contains(h))
        .collect();
    headers.extend(rest);
    headers
}

/// Recognizes a counted loop headed by `header`.
pub fn counted_loop(cfg: &FunctionCfg, header: BlockId) -> Result<CountedLoop, LoopShapeError> {
    let natural = natural_loop(cfg, header)?;
    let h = header.0;

    let (index, bound) = match &natural.cond {
        Expr::Binary {
            op: BinOp::Lt,
            lhs,
            rhs,
        } => match lhs.as_ref() {
            Expr::Var { name } => (name.clone(), rhs.as_ref().clone()),
            _ => return Err(LoopShapeError::ConditionShape(h)),
        },
        _ => return Err(LoopShapeError::ConditionShape(h)),
    };
    if !matches!(cfg.var_type(&index), Some(Ty::Scalar(_))) {
        return Err(LoopShapeError::ConditionShape(h));
    }
    if bound.touches_memory() {
        return Err(LoopShapeError::BoundNotInvariant {
            header: h,
            reason: "bound reads memory or calls a function".into(),
        });
    }
    if bound.mentions(&index) {
        return Err(LoopShapeError::BoundNotInvariant {
            header: h,
            reason: format!("bound mentions the index `{index}`"),
        });
    }

    let stmts: Vec<&Stmt> = natural
        .blocks()
        .into_iter()
        .filter_map(|id| cfg.block(id))
        .flat_map(|b| b.stmts.iter())
        .collect();
    if let Some(var) = stmts
        .iter()
        .filter_map(|s| s.assigned_var())
        .find(|v| *v != index && bound.mentions(v))
    {
        return Err(LoopShapeError::BoundNotInvariant {
            header: h,
            reason: format!("`{var}` is assigned inside the loop"),
        });
    }

    let updates: Vec<&Stmt> = stmts
        .iter()
        .copied()
        .filter(|s| s.assigned_var() == Some(index.as_str()))
        .collect();
    let step = match updates.as_slice() {
        [Stmt::Assign { value, .. }] => increment_step(value, &index),
        _ => None,
    }
    .ok_or_else(|| LoopShapeError::IndexUpdate {
        header: h,
        index: index.clone(),
    })?;

    Ok(CountedLoop {
        natural,
        index,
        bound,
        step,
    })
}

/// Step `c` of an update `index + c` with a positive constant `c`.
fn increment_step(value: &Expr, index: &str) -> Option<i128> {
    let Expr::Binary {
        op: BinOp::Add,
        lhs,
        rhs,
    } = value
    else {
        return None;
    };
    let (var, step) = match (lhs.as_ref(), rhs.as_ref()) {
        (Expr::Var { name }, c) | (c, Expr::Var { name }) => (name, c),
        _ => return None,
    };
    if var != index {
        return None;
    }
    let step = fold(step, &|_| None).ok()?.value;
    (step > 0).then_some(step)
}
