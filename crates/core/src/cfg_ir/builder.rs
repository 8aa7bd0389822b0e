//! Incremental construction of a [`FunctionCfg`].
//!
//! Front ends and test fixtures reserve block ids up front so that forward references
//! (loop exits, branch targets) can be written before the target block's body exists. Blocks
//! are emitted in the order their bodies are defined. The first defined block becomes the
//! entry unless [`FunctionBuilder::entry`] says otherwise.

use super::{Block, BlockId, FunctionCfg, Global, Terminator};
use crate::ir::{ScalarTy, Stmt, Ty};
use std::collections::BTreeSet;
use tangle_utils::errors::CfgError;
use tracing::debug;

/// Builder for a single function's CFG.
#[derive(Debug)]
pub struct FunctionBuilder {
    cfg: FunctionCfg,
    reserved: BTreeSet<BlockId>,
    entry: Option<BlockId>,
    error: Option<CfgError>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            cfg: FunctionCfg::new(name),
            reserved: BTreeSet::new(),
            entry: None,
            error: None,
        }
    }

    fn record(&mut self, result: Result<(), CfgError>) {
        if let Err(e) = result {
            self.error = self.error.take().or(Some(e));
        }
    }

    pub fn param(&mut self, name: &str, ty: Ty) -> &mut Self {
        let result = self.cfg.add_param(name, ty);
        self.record(result);
        self
    }

    pub fn returns(&mut self, ty: ScalarTy) -> &mut Self {
        self.cfg.ret = Some(ty);
        self
    }

    pub fn local(&mut self, name: &str, ty: Ty) -> &mut Self {
        let result = self.cfg.declare_local(name, ty);
        self.record(result);
        self
    }

    pub fn global(&mut self, name: &str, ty: ScalarTy, init: u64) -> &mut Self {
        let result = self.cfg.declare_global(name, Global { ty, init });
        self.record(result);
        self
    }

    /// Reserves an id for a block whose body will be defined later.
    pub fn reserve(&mut self) -> BlockId {
        match self.cfg.fresh_block_id() {
            Ok(id) => {
                self.reserved.insert(id);
                id
            }
            Err(e) => {
                self.record(Err(e));
                BlockId(u32::MAX)
            }
        }
    }

    /// Defines the body of a reserved block.
    pub fn block(&mut self, id: BlockId, stmts: Vec<Stmt>, terminator: Terminator) -> &mut Self {
        if !self.reserved.remove(&id) {
            self.record(Err(CfgError::DuplicateBlock(id.0)));
            return self;
        }
        if self.entry.is_none() {
            self.entry = Some(id);
        }
        let result = self.cfg.insert_block(id, Block::new(stmts, terminator));
        self.record(result);
        self
    }

    /// Overrides the entry block.
    pub fn entry(&mut self, id: BlockId) -> &mut Self {
        self.entry = Some(id);
        self
    }

    /// Validates and returns the finished CFG.
    pub fn finish(self) -> Result<FunctionCfg, CfgError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if let Some(id) = self.reserved.iter().next() {
            return Err(CfgError::Unterminated(id.0));
        }
        let mut cfg = self.cfg;
        let entry = self.entry.ok_or(CfgError::Empty)?;
        cfg.set_entry(entry)?;
        cfg.validate()?;
        debug!(
            "built `{}`: {} blocks, {} locals",
            cfg.name,
            cfg.block_count(),
            cfg.locals.len()
        );
        Ok(cfg)
    }
}
