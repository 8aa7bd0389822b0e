//! Splits straight-line blocks in two.
//!
//! The head keeps the first part of the statements and falls through to a new block
//! holding the rest and the original terminator. Semantics are untouched; the point is a
//! larger, less regular block graph for later passes to work on. Loop headers are never
//! split, since the head would lose the exit test.

use crate::{selection_size, PassContext, Transform};
use rand::{seq::SliceRandom, Rng};
use std::collections::HashSet;
use tangle_core::cfg_ir::{split_block, BlockId, FunctionCfg, Provenance};
use tangle_core::loops::loop_headers;
use tangle_utils::errors::TransformError;
use tracing::debug;

pub const NAME: &str = "block-fission";

#[derive(Debug, Clone, Copy, Default)]
pub struct BlockFission;

impl BlockFission {
    pub const fn new() -> Self {
        Self
    }
}

impl Transform for BlockFission {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(&self, cfg: &mut FunctionCfg, ctx: &mut PassContext) -> Result<bool, TransformError> {
        if cfg.is_flattened() {
            return Err(TransformError::UnsupportedConstruct {
                pass: NAME,
                reason: "function is already flattened".into(),
            });
        }
        let headers: HashSet<BlockId> = loop_headers(cfg).into_iter().collect();
        let mut candidates: Vec<BlockId> = cfg
            .blocks_in_order()
            .filter(|(id, b)| {
                b.stmts.len() >= 2 && b.provenance != Provenance::Dead && !headers.contains(id)
            })
            .map(|(id, _)| id)
            .collect();
        if candidates.is_empty() {
            return Ok(false);
        }
        let n = selection_size(candidates.len(), ctx.config.max_split_ratio);
        candidates.shuffle(&mut ctx.rng);
        candidates.truncate(n);

        for id in candidates {
            let len = cfg.get(id)?.stmts.len();
            let at = ctx.rng.random_range(1..len);
            let tail = split_block(cfg, id, at, Provenance::Split)?;
            debug!("split {id} at {at}, tail {tail}");
        }
        Ok(true)
    }
}
