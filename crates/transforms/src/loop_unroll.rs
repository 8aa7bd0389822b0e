//! Loop unrolling with guarded copies and a residual loop.
//!
//! A counted loop `H: if (i < n) goto B; else goto X` is rewritten so that its outside
//! predecessors enter a chain of `factor` guards. Guard `j` re-runs the header statements
//! and the original test, then either executes copy `j` of the body or leaves for `X`. The
//! back edges of copy `j` lead to guard `j + 1`, and those of the last copy lead to the
//! untouched original header, which is now the residual loop. Every iteration still tests
//! the same condition in the same order, so the number and order of body executions is
//! unchanged for any trip count, including zero.

use crate::{unsupported, PassContext, Transform};
use std::collections::HashSet;
use tangle_core::cfg_ir::{
    clone_region, retarget_predecessors, Block, BlockId, FunctionCfg, Provenance, Terminator,
};
use tangle_core::loops::{counted_loop, loops_innermost_first};
use tangle_utils::errors::TransformError;
use tracing::{debug, warn};

pub const NAME: &str = "loop-unroll";

/// Unrolls counted loops by a fixed factor.
#[derive(Debug, Clone)]
pub struct LoopUnroll {
    factor: usize,
    header: Option<BlockId>,
}

impl LoopUnroll {
    /// `header` selects one loop; `None` unrolls every counted loop present on entry.
    pub fn new(factor: usize, header: Option<BlockId>) -> Result<Self, TransformError> {
        check_factor(factor)?;
        Ok(Self { factor, header })
    }
}

pub(crate) fn check_factor(factor: usize) -> Result<(), TransformError> {
    if factor < 1 {
        return Err(TransformError::InvalidParameter {
            pass: NAME,
            detail: format!("factor must be at least 1, got {factor}"),
        });
    }
    Ok(())
}

/// Unrolls the counted loop headed by `header` `factor` times.
///
/// Returns the guard blocks in execution order; the first one replaces the header as the
/// loop's entry point.
pub fn unroll(
    cfg: &mut FunctionCfg,
    header: BlockId,
    factor: usize,
) -> Result<Vec<BlockId>, TransformError> {
    check_factor(factor)?;
    if cfg.is_flattened() {
        return Err(TransformError::UnsupportedConstruct {
            pass: NAME,
            reason: "function is already flattened".into(),
        });
    }
    let counted = counted_loop(cfg, header).map_err(|e| unsupported(NAME, e))?;
    let l = counted.natural;
    let header_stmts = cfg.get(header)?.stmts.clone();

    let guards = (0..factor)
        .map(|_| cfg.fresh_block_id())
        .collect::<Result<Vec<BlockId>, _>>()?;
    let mut created: Vec<BlockId> = Vec::new();
    for (j, &guard) in guards.iter().enumerate() {
        let copies = clone_region(cfg, &l.body, Provenance::Unrolled)?;
        let next = guards.get(j + 1).copied().unwrap_or(header);
        for &copy in copies.values() {
            if let Some(block) = cfg.block_mut(copy) {
                block.terminator.retarget(header, next);
            }
        }
        let entry = copies
            .get(&l.body_entry)
            .copied()
            .ok_or(TransformError::InvariantViolation {
                pass: NAME,
                block: Some(l.body_entry.0),
                detail: "loop body entry was not copied".into(),
            })?;
        cfg.insert_block(
            guard,
            Block::new(
                header_stmts.clone(),
                Terminator::branch(l.cond.clone(), entry, l.exit),
            )
            .with_provenance(Provenance::Unrolled),
        )?;
        created.push(guard);
        created.extend(copies.values().copied());
    }

    for &id in &created {
        cfg.move_before(id, header)?;
    }
    let mut skip: HashSet<BlockId> = created.iter().copied().collect();
    skip.extend(l.blocks());
    let redirected = retarget_predecessors(cfg, header, guards[0], &skip);
    if cfg.entry() == header {
        cfg.set_entry(guards[0])?;
    }

    debug!(
        "unrolled loop {header} (index `{}`) x{factor}: {} new blocks, {redirected} entries redirected",
        counted.index,
        created.len()
    );
    Ok(guards)
}

impl Transform for LoopUnroll {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(&self, cfg: &mut FunctionCfg, _ctx: &mut PassContext) -> Result<bool, TransformError> {
        if let Some(header) = self.header {
            unroll(cfg, header, self.factor)?;
            return Ok(true);
        }

        let headers = loops_innermost_first(cfg);
        if headers.is_empty() {
            warn!("`{}` has no loops; nothing to unroll", cfg.name);
            return Ok(false);
        }
        let mut unrolled = 0;
        let mut rejected = Vec::new();
        for header in headers {
            match counted_loop(cfg, header) {
                Ok(_) => {
                    unroll(cfg, header, self.factor)?;
                    unrolled += 1;
                }
                Err(e) => {
                    debug!("skipping loop at {header}: {e}");
                    rejected.push(e.to_string());
                }
            }
        }
        if unrolled == 0 {
            return Err(TransformError::UnsupportedConstruct {
                pass: NAME,
                reason: format!("no counted loop to unroll ({})", rejected.join("; ")),
            });
        }
        Ok(true)
    }
}
