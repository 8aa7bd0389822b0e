//! Structural editing helpers shared by the transform passes.
//!
//! None of these delete blocks. Replaced blocks are detached by retargeting their
//! predecessors, which keeps every previously issued id valid.

use super::{Block, BlockId, FunctionCfg, Provenance, Terminator};
use indexmap::IndexMap;
use std::collections::HashSet;
use tangle_utils::errors::CfgError;
use tracing::debug;

/// Splits block `id` before statement `at`.
///
/// The tail statements and the original terminator move into a new block that is emitted
/// right after `id`; `id` keeps the head and falls through to the new block. Returns the id
/// of the new continuation block.
pub fn split_block(
    cfg: &mut FunctionCfg,
    id: BlockId,
    at: usize,
    provenance: Provenance,
) -> Result<BlockId, CfgError> {
    let cont = cfg.fresh_block_id()?;
    let block = cfg.get_mut(id)?;
    let at = at.min(block.stmts.len());
    let tail = block.stmts.split_off(at);
    let terminator = std::mem::replace(&mut block.terminator, Terminator::goto(cont));
    cfg.insert_block(
        cont,
        Block::new(tail, terminator).with_provenance(provenance),
    )?;
    cfg.move_after(cont, id)?;
    debug!("split {id} at {at} into {id} -> {cont}");
    Ok(cont)
}

/// Redirects every transfer to `from` towards `to`, except from blocks in `skip`.
///
/// Returns the number of blocks whose terminator changed.
pub fn retarget_predecessors(
    cfg: &mut FunctionCfg,
    from: BlockId,
    to: BlockId,
    skip: &HashSet<BlockId>,
) -> usize {
    let mut changed = 0;
    for id in cfg.block_ids() {
        if skip.contains(&id) {
            continue;
        }
        if let Some(block) = cfg.block_mut(id) {
            if block.terminator.retarget(from, to) {
                changed += 1;
            }
        }
    }
    changed
}

/// Copies the blocks of `region` under fresh ids.
///
/// Transfers between blocks of the region are remapped onto the copies; transfers leaving
/// the region keep their original targets. The copies are appended in region order and
/// the returned map goes from original id to copy id.
pub fn clone_region(
    cfg: &mut FunctionCfg,
    region: &[BlockId],
    provenance: Provenance,
) -> Result<IndexMap<BlockId, BlockId>, CfgError> {
    let mut map = IndexMap::new();
    for &id in region {
        if !cfg.contains(id) {
            return Err(CfgError::UnknownBlock(id.0));
        }
        let copy = cfg.fresh_block_id()?;
        map.insert(id, copy);
    }
    for (&orig, &copy) in &map {
        let mut block = cfg.get(orig)?.clone();
        block
            .terminator
            .map_targets(|t| map.get(&t).copied().unwrap_or(t));
        block.provenance = provenance;
        cfg.insert_block(copy, block)?;
    }
    debug!("cloned {} blocks ({:?})", map.len(), provenance);
    Ok(map)
}
