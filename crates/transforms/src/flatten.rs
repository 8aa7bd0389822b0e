//! Control-flow flattening.
//!
//! Every block is assigned a dense state id and listed in a dispatch table. A single
//! dispatcher block transfers to `table[state]`; each original transfer is rewritten into
//! an assignment of the successor's state followed by a jump back to the dispatcher. A
//! conditional branch becomes one assignment of a selected state, so its condition is
//! still evaluated exactly once.
//!
//! Flattening must be the last structural pass: no other pass accepts a CFG that already
//! contains a dispatcher.

use crate::{PassContext, Transform};
use rand::{rngs::StdRng, seq::SliceRandom};
use std::collections::{HashMap, HashSet};
use tangle_core::cfg_ir::{Block, BlockId, DispatchMode, FunctionCfg, Provenance, Terminator};
use tangle_core::ir::{Expr, ScalarTy, Stmt, Ty};
use tangle_utils::errors::TransformError;
use tracing::debug;

pub const NAME: &str = "flatten";

#[derive(Debug, Clone, Copy, Default)]
pub struct Flatten {
    mode: DispatchMode,
}

impl Flatten {
    pub const fn new(mode: DispatchMode) -> Self {
        Self { mode }
    }
}

/// Layout of a flattened function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flattened {
    /// Block that sets the initial state; the new function entry.
    pub init: BlockId,
    pub dispatcher: BlockId,
    /// Name of the state variable.
    pub state: String,
    /// `table[s]` is the block with state `s`.
    pub table: Vec<BlockId>,
}

/// Flattens `cfg` around a single dispatcher.
///
/// With `permute` set, state ids are a random permutation instead of emission order.
pub fn flatten(
    cfg: &mut FunctionCfg,
    mode: DispatchMode,
    permute: bool,
    rng: &mut StdRng,
) -> Result<Flattened, TransformError> {
    if cfg.is_flattened() {
        return Err(TransformError::UnsupportedConstruct {
            pass: NAME,
            reason: "function is already flattened".into(),
        });
    }

    let mut table = cfg.block_ids();
    if permute {
        table.shuffle(rng);
    }
    let states: HashMap<BlockId, u64> = table
        .iter()
        .enumerate()
        .map(|(s, id)| (*id, s as u64))
        .collect();
    let state_of = |id: BlockId| {
        states
            .get(&id)
            .copied()
            .ok_or(TransformError::InvariantViolation {
                pass: NAME,
                block: Some(id.0),
                detail: "transfer target has no state".into(),
            })
    };

    let prefix = format!("_{}_next", cfg.name);
    let state = cfg.fresh_local(&prefix, Ty::Scalar(ScalarTy::U64));
    let dispatcher = cfg.fresh_block_id()?;

    for &id in &table {
        let block = cfg.get_mut(id)?;
        let value = match &block.terminator {
            Terminator::Fallthrough { next } => Expr::u64(state_of(*next)?),
            Terminator::Branch {
                cond,
                then_to,
                else_to,
            } => Expr::select(
                cond.clone(),
                Expr::u64(state_of(*then_to)?),
                Expr::u64(state_of(*else_to)?),
            ),
            Terminator::Return { .. } | Terminator::Unreachable => continue,
            Terminator::Dispatch { .. } => {
                return Err(TransformError::InvariantViolation {
                    pass: NAME,
                    block: Some(id.0),
                    detail: "nested dispatcher".into(),
                })
            }
        };
        block.stmts.push(Stmt::assign(state.clone(), value));
        block.terminator = Terminator::goto(dispatcher);
    }

    let entry_state = state_of(cfg.entry())?;
    cfg.insert_block(
        dispatcher,
        Block::new(
            vec![],
            Terminator::Dispatch {
                state: state.clone(),
                table: table.clone(),
                mode,
            },
        )
        .with_provenance(Provenance::Dispatch),
    )?;
    let init = cfg.add_block(
        Block::new(
            vec![Stmt::assign(state.clone(), Expr::u64(entry_state))],
            Terminator::goto(dispatcher),
        )
        .with_provenance(Provenance::Dispatch),
    )?;
    cfg.move_to_front(init)?;
    cfg.move_after(dispatcher, init)?;
    cfg.set_entry(init)?;

    check_totality(cfg, dispatcher, &table)?;
    debug!(
        "flattened `{}` into {} states ({})",
        cfg.name,
        table.len(),
        mode.tag()
    );
    Ok(Flattened {
        init,
        dispatcher,
        state,
        table,
    })
}

/// Every block except the init block and the dispatcher must own exactly one table slot,
/// and every transfer must go through the dispatcher.
fn check_totality(
    cfg: &FunctionCfg,
    dispatcher: BlockId,
    table: &[BlockId],
) -> Result<(), TransformError> {
    let mut seen = HashSet::new();
    for id in table {
        if !cfg.contains(*id) || !seen.insert(*id) {
            return Err(TransformError::InvariantViolation {
                pass: NAME,
                block: Some(id.0),
                detail: "dispatch table entry is missing or duplicated".into(),
            });
        }
    }
    for (id, block) in cfg.blocks_in_order() {
        if id == dispatcher || id == cfg.entry() {
            continue;
        }
        if !seen.contains(&id) {
            return Err(TransformError::InvariantViolation {
                pass: NAME,
                block: Some(id.0),
                detail: "block has no state".into(),
            });
        }
        if block.terminator.successors().iter().any(|t| *t != dispatcher) {
            return Err(TransformError::InvariantViolation {
                pass: NAME,
                block: Some(id.0),
                detail: "transfer bypasses the dispatcher".into(),
            });
        }
    }
    Ok(())
}

impl Transform for Flatten {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(&self, cfg: &mut FunctionCfg, ctx: &mut PassContext) -> Result<bool, TransformError> {
        flatten(cfg, self.mode, ctx.config.permute_states, &mut ctx.rng)?;
        Ok(true)
    }
}
