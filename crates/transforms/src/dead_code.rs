//! Dead-code injection behind opaque predicates.
//!
//! A block is split at a random statement and the two halves are joined by a branch on an
//! opaque predicate. One arm leads to the continuation, the other to a freshly created
//! block that no execution can reach. The polarity is random: sometimes the predicate is
//! always false and guards the dead arm, sometimes it is always true and guards the live
//! one.

use crate::opaque_predicate::{OpaqueContext, ENTROPY_GLOBAL};
use crate::{selection_size, PassContext, Transform};
use rand::{rngs::StdRng, seq::SliceRandom, Rng};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tangle_core::cfg_ir::{split_block, Block, BlockId, FunctionCfg, Provenance, Terminator};
use tangle_core::ir::{BinOp, Expr, ScalarTy, Stmt, Ty};
use tangle_core::loops::loop_headers;
use tangle_utils::errors::TransformError;
use tracing::{debug, warn};

pub const NAME: &str = "deadcode";

/// Payload of an injected dead block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeadCodeVariant {
    /// Prints from a bogus string pointer and exits with a failure status.
    #[default]
    Bug,
    /// Arithmetic on the entropy constant, then rejoins the live path.
    Plain,
}

impl DeadCodeVariant {
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Bug => "bug",
            Self::Plain => "plain",
        }
    }
}

/// Injects dead blocks at a given point or at a sample of eligible blocks.
#[derive(Debug, Clone)]
pub struct DeadCode {
    variant: DeadCodeVariant,
    insertion_point: Option<BlockId>,
}

impl DeadCode {
    pub const fn new(variant: DeadCodeVariant, insertion_point: Option<BlockId>) -> Self {
        Self {
            variant,
            insertion_point,
        }
    }
}

/// Injects one dead block at `at` and returns its id.
///
/// `opaque` must already be installed in `cfg`.
pub fn inject_dead(
    cfg: &mut FunctionCfg,
    at: BlockId,
    variant: DeadCodeVariant,
    opaque: &OpaqueContext,
    rng: &mut StdRng,
) -> Result<BlockId, TransformError> {
    if cfg.is_flattened() {
        return Err(TransformError::UnsupportedConstruct {
            pass: NAME,
            reason: "function is already flattened".into(),
        });
    }
    let len = cfg
        .block(at)
        .ok_or_else(|| TransformError::InvalidParameter {
            pass: NAME,
            detail: format!("insertion point {at} does not exist"),
        })?
        .stmts
        .len();

    let cut = rng.random_range(0..=len);
    let cont = split_block(cfg, at, cut, Provenance::Split)?;

    let dead = match variant {
        DeadCodeVariant::Bug => Block::new(
            vec![
                Stmt::eval(Expr::call(
                    "printf",
                    vec![Expr::binary(
                        BinOp::Sub,
                        Expr::str("Error!"),
                        Expr::i32(rng.random_range(1..=4)),
                    )],
                )),
                Stmt::eval(Expr::call("exit", vec![Expr::i32(rng.random_range(1..=8))])),
            ],
            Terminator::Unreachable,
        ),
        DeadCodeVariant::Plain => {
            let noise = cfg.fresh_local("_dead", Ty::Scalar(ScalarTy::U64));
            Block::new(
                vec![
                    Stmt::assign(
                        noise.clone(),
                        Expr::binary(
                            BinOp::Xor,
                            Expr::var(ENTROPY_GLOBAL),
                            Expr::u64(rng.random()),
                        ),
                    ),
                    Stmt::assign(
                        noise.clone(),
                        Expr::mul(Expr::var(noise), Expr::u64(rng.random_range(3..=97) | 1)),
                    ),
                ],
                Terminator::goto(cont),
            )
        }
    };
    let dead_id = cfg.add_block(dead.with_provenance(Provenance::Dead))?;
    cfg.move_after(dead_id, at)?;

    let terminator = if rng.random_bool(0.5) {
        let pred = opaque.generate(false, rng.random())?;
        Terminator::branch(pred, dead_id, cont)
    } else {
        let pred = opaque.generate(true, rng.random())?;
        Terminator::branch(pred, cont, dead_id)
    };
    cfg.set_terminator(at, terminator)?;
    debug!("dead block {dead_id} ({}) guarded at {at}", variant.tag());
    Ok(dead_id)
}

/// Blocks that may host an injected dead block. Loop headers are left alone so that the
/// loop test stays the header's terminator.
fn eligible(cfg: &FunctionCfg) -> Vec<BlockId> {
    let reachable = cfg.reachable();
    let headers: HashSet<BlockId> = loop_headers(cfg).into_iter().collect();
    cfg.blocks_in_order()
        .filter(|(id, b)| {
            reachable.contains(id)
                && !headers.contains(id)
                && b.provenance != Provenance::Dead
                && b.provenance != Provenance::Dispatch
                && b.terminator != Terminator::Unreachable
        })
        .map(|(id, _)| id)
        .collect()
}

impl Transform for DeadCode {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(&self, cfg: &mut FunctionCfg, ctx: &mut PassContext) -> Result<bool, TransformError> {
        ctx.opaque.install(cfg)?;
        let targets = match self.insertion_point {
            Some(at) => vec![at],
            None => {
                let mut candidates = eligible(cfg);
                if candidates.is_empty() {
                    warn!("`{}` has no block that can host dead code", cfg.name);
                    return Ok(false);
                }
                let n = selection_size(candidates.len(), ctx.config.max_dead_ratio);
                candidates.shuffle(&mut ctx.rng);
                candidates.truncate(n);
                candidates
            }
        };
        for at in targets {
            inject_dead(cfg, at, self.variant, &ctx.opaque, &mut ctx.rng)?;
        }
        Ok(true)
    }
}
