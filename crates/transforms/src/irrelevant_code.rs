//! Semantically irrelevant statements.
//!
//! Two kinds of noise are inserted into a sample of blocks: arithmetic on a fresh local
//! that nothing reads, and a `x = x + c; x = x - c` pair right after the first assignment
//! to an unsigned variable. Unsigned arithmetic wraps in C, so the pair restores `x`
//! exactly. Variables read by a loop header's test are left alone so that loop indices
//! keep their single update and later loop passes still recognize the loop.

use crate::{selection_size, PassContext, Transform};
use rand::{seq::SliceRandom, Rng};
use std::collections::HashSet;
use tangle_core::cfg_ir::{BlockId, FunctionCfg, Provenance, Terminator};
use tangle_core::ir::{Expr, ScalarTy, Stmt, Ty};
use tangle_core::loops::loop_headers;
use tangle_utils::errors::TransformError;
use tracing::debug;

pub const NAME: &str = "irrelevant-code";

#[derive(Debug, Clone, Copy, Default)]
pub struct IrrelevantCode;

impl IrrelevantCode {
    pub const fn new() -> Self {
        Self
    }
}

/// Variables read by the exit test of some loop header.
fn loop_test_vars(cfg: &FunctionCfg) -> HashSet<String> {
    let mut vars = HashSet::new();
    for header in loop_headers(cfg) {
        if let Some(Terminator::Branch { cond, .. }) = cfg.block(header).map(|b| &b.terminator) {
            cond.visit_vars(&mut |v| {
                vars.insert(v.to_string());
            });
        }
    }
    vars
}

fn unsigned_var(
    cfg: &FunctionCfg,
    stmt: &Stmt,
    protected: &HashSet<String>,
) -> Option<(String, ScalarTy)> {
    let name = stmt.assigned_var()?;
    if protected.contains(name) {
        return None;
    }
    match cfg.var_type(name)?.scalar()? {
        ty @ (ScalarTy::U8 | ScalarTy::U32 | ScalarTy::U64) => Some((name.to_string(), ty)),
        _ => None,
    }
}

impl Transform for IrrelevantCode {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(&self, cfg: &mut FunctionCfg, ctx: &mut PassContext) -> Result<bool, TransformError> {
        let reachable = cfg.reachable();
        let mut candidates: Vec<BlockId> = cfg
            .blocks_in_order()
            .filter(|(id, b)| {
                reachable.contains(id)
                    && !matches!(b.provenance, Provenance::Dead | Provenance::Dispatch)
            })
            .map(|(id, _)| id)
            .collect();
        if candidates.is_empty() {
            return Ok(false);
        }
        let n = selection_size(candidates.len(), ctx.config.max_noise_ratio);
        candidates.shuffle(&mut ctx.rng);
        candidates.truncate(n);

        let protected = loop_test_vars(cfg);
        let junk = cfg.fresh_local("_junk", Ty::Scalar(ScalarTy::U32));
        for id in candidates {
            let rng = &mut ctx.rng;
            let pair = cfg
                .get(id)?
                .stmts
                .iter()
                .enumerate()
                .find_map(|(i, s)| unsigned_var(cfg, s, &protected).map(|v| (i, v)));
            let noise = [
                Stmt::assign(junk.clone(), Expr::u32(rng.random())),
                Stmt::assign(
                    junk.clone(),
                    Expr::add(
                        Expr::mul(Expr::var(junk.clone()), Expr::u32(rng.random_range(2..64))),
                        Expr::u32(rng.random()),
                    ),
                ),
            ];
            let c: u8 = rng.random_range(1..=u8::MAX);
            let block = cfg.get_mut(id)?;
            if let Some((i, (var, ty))) = pair {
                let c = Expr::int(i128::from(c), ty);
                block.stmts.splice(
                    i + 1..i + 1,
                    [
                        Stmt::assign(var.clone(), Expr::add(Expr::var(var.clone()), c.clone())),
                        Stmt::assign(var.clone(), Expr::sub(Expr::var(var), c)),
                    ],
                );
            }
            let at = rng.random_range(0..=block.stmts.len());
            block.stmts.splice(at..at, noise);
            debug!("irrelevant statements in {id}");
        }
        Ok(true)
    }
}
