//! Loop fission into a chain of sub-loops.
//!
//! The loop headed by `H` is copied `split_count - 1` times. Each copy keeps the original
//! header test (a false test still leaves for the original exit) but its back edges pass
//! through an auxiliary exit block that may hand control to the next sub-loop instead of
//! iterating again. The last sub-loop in the chain is the original loop, which has no
//! auxiliary exit and therefore runs to the original bound. The loop index lives in the
//! function's own variables, so each sub-loop resumes where the previous one stopped and
//! every iteration runs exactly once.
//!
//! Two auxiliary exits are supported:
//! * [`FissionExit::Counted`] leaves after a per-sub-loop budget drawn from the run RNG. A
//!   fresh counter is reset in a preheader before each sub-loop.
//! * [`FissionExit::Random`] leaves when `rand() % 10 < 5`, so the split point differs from
//!   run to run while total coverage stays the same.

use crate::{unsupported, PassContext, Transform};
use rand::{rngs::StdRng, Rng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tangle_core::cfg_ir::{
    clone_region, retarget_predecessors, Block, BlockId, FunctionCfg, Provenance, Terminator,
};
use tangle_core::ir::{BinOp, Expr, ScalarTy, Stmt, Ty};
use tangle_core::loops::{loops_innermost_first, natural_loop};
use tangle_utils::errors::TransformError;
use tracing::{debug, warn};

pub const NAME: &str = "loop-fission";

/// How a fission sub-loop decides to hand over to the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FissionExit {
    /// Leave after a fixed iteration budget.
    #[default]
    Counted,
    /// Leave when `rand() % 10 < 5`.
    Random,
}

impl FissionExit {
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Counted => "counted",
            Self::Random => "random",
        }
    }
}

/// Splits loops into chained sub-loops.
#[derive(Debug, Clone)]
pub struct LoopFission {
    split_count: usize,
    exit: FissionExit,
    header: Option<BlockId>,
}

impl LoopFission {
    pub fn new(
        split_count: usize,
        exit: FissionExit,
        header: Option<BlockId>,
    ) -> Result<Self, TransformError> {
        check_split_count(split_count)?;
        Ok(Self {
            split_count,
            exit,
            header,
        })
    }
}

pub(crate) fn check_split_count(split_count: usize) -> Result<(), TransformError> {
    if split_count < 2 {
        return Err(TransformError::InvalidParameter {
            pass: NAME,
            detail: format!("split_count must be at least 2, got {split_count}"),
        });
    }
    Ok(())
}

/// Splits the loop headed by `header` into `split_count` chained sub-loops.
///
/// Returns the entry block of every sub-loop in chain order. The last entry leads to the
/// original header.
pub fn fission(
    cfg: &mut FunctionCfg,
    header: BlockId,
    split_count: usize,
    exit: FissionExit,
    max_chunk: u32,
    rng: &mut StdRng,
) -> Result<Vec<BlockId>, TransformError> {
    check_split_count(split_count)?;
    if max_chunk < 1 {
        return Err(TransformError::InvalidParameter {
            pass: NAME,
            detail: "max_fission_chunk must be at least 1".into(),
        });
    }
    if cfg.is_flattened() {
        return Err(TransformError::UnsupportedConstruct {
            pass: NAME,
            reason: "function is already flattened".into(),
        });
    }
    let l = natural_loop(cfg, header).map_err(|e| unsupported(NAME, e))?;
    let region = l.blocks();

    let counter = match exit {
        FissionExit::Counted => Some(cfg.fresh_local("_fission_t", Ty::Scalar(ScalarTy::U32))),
        FissionExit::Random => None,
    };
    let preheader = |cfg: &mut FunctionCfg, target: BlockId| match &counter {
        Some(t) => cfg.add_block(
            Block::new(
                vec![Stmt::assign(t.clone(), Expr::u32(0))],
                Terminator::goto(target),
            )
            .with_provenance(Provenance::Fission),
        ),
        None => Ok(target),
    };

    // Built back to front so each sub-loop knows where its auxiliary exit leads.
    let mut next_entry = preheader(cfg, header)?;
    let mut entries = vec![next_entry];
    let mut groups: Vec<Vec<BlockId>> = vec![if next_entry == header {
        Vec::new()
    } else {
        vec![next_entry]
    }];
    for _ in 1..split_count {
        let copies = clone_region(cfg, &region, Provenance::Fission)?;
        let sub_header = copies.get(&header).copied().ok_or(TransformError::InvariantViolation {
            pass: NAME,
            block: Some(header.0),
            detail: "loop header was not copied".into(),
        })?;
        let aux = cfg.fresh_block_id()?;
        for &copy in copies.values() {
            if let Some(block) = cfg.block_mut(copy) {
                block.terminator.retarget(sub_header, aux);
            }
        }
        let aux_block = match &counter {
            Some(t) => {
                let budget = rng.random_range(1..=max_chunk);
                Block::new(
                    vec![Stmt::assign(t.clone(), Expr::add(Expr::var(t.clone()), Expr::u32(1)))],
                    Terminator::branch(
                        Expr::lt(Expr::var(t.clone()), Expr::u32(budget)),
                        sub_header,
                        next_entry,
                    ),
                )
            }
            None => Block::new(
                vec![],
                Terminator::branch(
                    Expr::lt(
                        Expr::binary(BinOp::Rem, Expr::call("rand", vec![]), Expr::i32(10)),
                        Expr::i32(5),
                    ),
                    sub_header,
                    next_entry,
                ),
            ),
        };
        cfg.insert_block(aux, aux_block.with_provenance(Provenance::Fission))?;

        let entry = preheader(cfg, sub_header)?;
        let mut group: Vec<BlockId> = Vec::new();
        if entry != sub_header {
            group.push(entry);
        }
        group.extend(copies.values().copied());
        group.push(aux);
        groups.push(group);
        entries.push(entry);
        next_entry = entry;
    }
    entries.reverse();
    groups.reverse();

    let created: Vec<BlockId> = groups.into_iter().flatten().collect();
    for &id in &created {
        cfg.move_before(id, header)?;
    }
    let mut skip: HashSet<BlockId> = created.iter().copied().collect();
    skip.extend(region.iter().copied());
    retarget_predecessors(cfg, header, entries[0], &skip);
    if cfg.entry() == header {
        cfg.set_entry(entries[0])?;
    }

    debug!(
        "split loop {header} into {split_count} sub-loops ({} exit), {} new blocks",
        exit.tag(),
        created.len()
    );
    Ok(entries)
}

impl Transform for LoopFission {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(&self, cfg: &mut FunctionCfg, ctx: &mut PassContext) -> Result<bool, TransformError> {
        let max_chunk = ctx.config.max_fission_chunk;
        if let Some(header) = self.header {
            fission(cfg, header, self.split_count, self.exit, max_chunk, &mut ctx.rng)?;
            return Ok(true);
        }

        let headers = loops_innermost_first(cfg);
        if headers.is_empty() {
            warn!("`{}` has no loops; nothing to split", cfg.name);
            return Ok(false);
        }
        for header in headers {
            fission(cfg, header, self.split_count, self.exit, max_chunk, &mut ctx.rng)?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use tangle_core::cfg_ir::FunctionBuilder;

    fn count_loop() -> FunctionCfg {
        let mut b = FunctionBuilder::new("count");
        b.param("n", Ty::Scalar(ScalarTy::I32)).returns(ScalarTy::I32);
        b.local("i", Ty::Scalar(ScalarTy::I32));
        let header = b.reserve();
        let body = b.reserve();
        let exit = b.reserve();
        let entry = b.reserve();
        b.block(entry, vec![Stmt::assign("i", Expr::i32(0))], Terminator::goto(header));
        b.block(
            header,
            vec![],
            Terminator::branch(Expr::lt(Expr::var("i"), Expr::var("n")), body, exit),
        );
        b.block(
            body,
            vec![Stmt::assign("i", Expr::add(Expr::var("i"), Expr::i32(1)))],
            Terminator::goto(header),
        );
        b.block(exit, vec![], Terminator::ret(Some(Expr::var("i"))));
        b.finish().unwrap()
    }

    #[test]
    fn counted_fission_chains_sub_loops() {
        let mut cfg = count_loop();
        let mut rng = StdRng::seed_from_u64(42);
        let entries = fission(&mut cfg, BlockId(0), 3, FissionExit::Counted, 4, &mut rng).unwrap();
        cfg.validate().unwrap();
        assert_eq!(entries.len(), 3);
        // Every sub-loop entry is a counter reset.
        for e in &entries {
            let block = cfg.get(*e).unwrap();
            assert_eq!(block.stmts, vec![Stmt::assign("_fission_t", Expr::u32(0))]);
        }
        let last = cfg.get(*entries.last().unwrap()).unwrap();
        assert_eq!(last.terminator, Terminator::goto(BlockId(0)));
        assert_eq!(cfg.get(BlockId(3)).unwrap().terminator, Terminator::goto(entries[0]));
        // The original loop is left intact as the final sub-loop.
        assert_eq!(cfg.get(BlockId(1)).unwrap().terminator, Terminator::goto(BlockId(0)));
    }

    #[test]
    fn random_fission_calls_rand_on_back_edges() {
        let mut cfg = count_loop();
        let mut rng = StdRng::seed_from_u64(1);
        let entries = fission(&mut cfg, BlockId(0), 2, FissionExit::Random, 4, &mut rng).unwrap();
        cfg.validate().unwrap();
        assert_eq!(entries[1], BlockId(0));
        let aux_calls = cfg
            .blocks_in_order()
            .filter(|(_, b)| match &b.terminator {
                Terminator::Branch { cond, .. } => cond.touches_memory(),
                _ => false,
            })
            .count();
        assert_eq!(aux_calls, 1);
    }

    #[test]
    fn do_while_loop_is_an_error() {
        // i = 0; L: i++; if (i < n) goto L; else goto exit
        let mut b = FunctionBuilder::new("do_while");
        b.param("n", Ty::Scalar(ScalarTy::I32)).returns(ScalarTy::I32);
        b.local("i", Ty::Scalar(ScalarTy::I32));
        let entry = b.reserve();
        let body = b.reserve();
        let exit = b.reserve();
        b.block(entry, vec![Stmt::assign("i", Expr::i32(0))], Terminator::goto(body));
        b.block(
            body,
            vec![Stmt::assign("i", Expr::add(Expr::var("i"), Expr::i32(1)))],
            Terminator::branch(Expr::lt(Expr::var("i"), Expr::var("n")), body, exit),
        );
        b.block(exit, vec![], Terminator::ret(Some(Expr::var("i"))));
        let mut cfg = b.finish().unwrap();

        let mut ctx = PassContext::new(
            3,
            crate::opaque_predicate::OpaqueContext::new(
                crate::opaque_predicate::OpaqueConstants::from_seed(3),
            ),
            crate::PassConfig::default(),
        );
        let err = LoopFission::new(2, FissionExit::Counted, None)
            .unwrap()
            .apply(&mut cfg, &mut ctx)
            .unwrap_err();
        assert!(matches!(err, TransformError::UnsupportedConstruct { pass: NAME, .. }));
    }

    #[test]
    fn rejects_single_split() {
        assert!(matches!(
            LoopFission::new(1, FissionExit::Counted, None),
            Err(TransformError::InvalidParameter { pass: NAME, .. })
        ));
    }
}
