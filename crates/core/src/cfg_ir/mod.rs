//! Control-flow graph model for a single C function.
//!
//! A [`FunctionCfg`] owns an insertion-ordered map of basic blocks, each ending in exactly one
//! [`Terminator`]. Block ids are handed out monotonically by [`FunctionCfg::fresh_block_id`]
//! and are never reused within a run, so a pass that logically removes a block retargets its
//! predecessors and leaves the block in place. Insertion order is the emission order, which
//! keeps the emitted text deterministic for a given seed.
//!
//! The type also owns the declaration environment of the function: parameters, locals, and
//! the globals visible to it (including the opaque-predicate constants once a pass installs
//! them). [`FunctionCfg::validate`] checks the structural invariants every pass must preserve:
//! an existing entry block, no dangling block references, and no undeclared variables.

use crate::ir::{Expr, ScalarTy, Stmt, Ty};
use indexmap::IndexMap;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tangle_utils::errors::CfgError;

pub use self::builder::FunctionBuilder;
pub use self::updates::{clone_region, retarget_predecessors, split_block};

mod builder;
mod updates;

/// Stable identity of a basic block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockId(pub u32);

impl BlockId {
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Which part of the pipeline created a block. Used for metrics and for instrumentation in
/// tests (e.g. counting visits to injected dead blocks); never consulted by a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    /// Present in the input CFG.
    #[default]
    Source,
    /// Guard or body copy created by loop unrolling.
    Unrolled,
    /// Copy or auxiliary exit block created by loop fission.
    Fission,
    /// Continuation created by splitting an existing block.
    Split,
    /// Dynamically unreachable block guarded by a false opaque predicate.
    Dead,
    /// State initialization or dispatcher block created by flattening.
    Dispatch,
}

/// How a flattened dispatcher performs its indirect transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DispatchMode {
    /// Table of label addresses, `goto *(table[state])`.
    #[default]
    IndirectGoto,
    /// Exhaustive `switch` over the state variable.
    Switch,
}

impl DispatchMode {
    /// Tag used in pass specifications and the variant footer.
    pub const fn tag(self) -> &'static str {
        match self {
            Self::IndirectGoto => "indirect-goto",
            Self::Switch => "switch",
        }
    }
}

/// Control transfer ending a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Terminator {
    Fallthrough {
        next: BlockId,
    },
    Branch {
        cond: Expr,
        then_to: BlockId,
        else_to: BlockId,
    },
    Return {
        value: Option<Expr>,
    },
    /// Never executed. Marks the end of injected dead blocks.
    Unreachable,
    /// Indirect transfer through `table[state]`. Only produced by flattening.
    Dispatch {
        state: String,
        table: Vec<BlockId>,
        mode: DispatchMode,
    },
}

impl Terminator {
    pub const fn goto(next: BlockId) -> Self {
        Self::Fallthrough { next }
    }

    pub const fn branch(cond: Expr, then_to: BlockId, else_to: BlockId) -> Self {
        Self::Branch {
            cond,
            then_to,
            else_to,
        }
    }

    pub const fn ret(value: Option<Expr>) -> Self {
        Self::Return { value }
    }

    /// Blocks this terminator may transfer to, in declaration order.
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Self::Fallthrough { next } => vec![*next],
            Self::Branch {
                then_to, else_to, ..
            } => vec![*then_to, *else_to],
            Self::Return { .. } | Self::Unreachable => Vec::new(),
            Self::Dispatch { table, .. } => table.clone(),
        }
    }

    /// Rewrites every target through `f`.
    pub fn map_targets(&mut self, mut f: impl FnMut(BlockId) -> BlockId) {
        match self {
            Self::Fallthrough { next } => *next = f(*next),
            Self::Branch {
                then_to, else_to, ..
            } => {
                *then_to = f(*then_to);
                *else_to = f(*else_to);
            }
            Self::Return { .. } | Self::Unreachable => {}
            Self::Dispatch { table, .. } => table.iter_mut().for_each(|t| *t = f(*t)),
        }
    }

    /// Replaces every transfer to `from` with a transfer to `to`. Returns whether anything changed.
    pub fn retarget(&mut self, from: BlockId, to: BlockId) -> bool {
        let mut changed = false;
        self.map_targets(|t| {
            if t == from {
                changed = true;
                to
            } else {
                t
            }
        });
        changed
    }

    pub const fn is_dispatch(&self) -> bool {
        matches!(self, Self::Dispatch { .. })
    }

    /// Calls `f` for every variable this terminator reads.
    pub fn visit_vars<'a>(&'a self, f: &mut impl FnMut(&'a str)) {
        match self {
            Self::Branch { cond, .. } => cond.visit_vars(f),
            Self::Return { value: Some(v) } => v.visit_vars(f),
            Self::Dispatch { state, .. } => f(state),
            Self::Fallthrough { .. } | Self::Return { value: None } | Self::Unreachable => {}
        }
    }
}

/// A basic block: straight-line statements plus one terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub stmts: Vec<Stmt>,
    pub terminator: Terminator,
    pub provenance: Provenance,
}

impl Block {
    pub const fn new(stmts: Vec<Stmt>, terminator: Terminator) -> Self {
        Self {
            stmts,
            terminator,
            provenance: Provenance::Source,
        }
    }

    #[must_use]
    pub const fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }
}

/// Function parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: Ty,
}

/// Global scalar visible to the function, with its initial bit pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Global {
    pub ty: ScalarTy,
    #[serde(default)]
    pub init: u64,
}

/// Edge label in the petgraph view of a CFG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EdgeType {
    Fallthrough,
    BranchTrue,
    BranchFalse,
    /// One entry of a dispatch table.
    Dispatch,
}

/// petgraph view of a CFG. Node weights are block ids; node order follows block order.
#[derive(Debug, Clone)]
pub struct CfgGraph {
    pub graph: DiGraph<BlockId, EdgeType>,
    pub nodes: HashMap<BlockId, NodeIndex>,
    pub entry: NodeIndex,
}

/// Control-flow graph of one function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "CfgRepr", try_from = "CfgRepr")]
pub struct FunctionCfg {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Option<ScalarTy>,
    pub locals: IndexMap<String, Ty>,
    pub globals: IndexMap<String, Global>,
    entry: BlockId,
    blocks: IndexMap<BlockId, Block>,
    /// Next id to hand out. Wider than [`BlockId`] so that `u32::MAX` can still be inserted.
    next_block: u64,
}

impl FunctionCfg {
    /// Creates an empty function. The entry must be set once blocks exist.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            ret: None,
            locals: IndexMap::new(),
            globals: IndexMap::new(),
            entry: BlockId(0),
            blocks: IndexMap::new(),
            next_block: 0,
        }
    }

    pub const fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn set_entry(&mut self, id: BlockId) -> Result<(), CfgError> {
        if !self.blocks.contains_key(&id) {
            return Err(CfgError::MissingEntry(id.0));
        }
        self.entry = id;
        Ok(())
    }

    /// Allocates a block id that has never been handed out in this function.
    pub fn fresh_block_id(&mut self) -> Result<BlockId, CfgError> {
        let id = u32::try_from(self.next_block).map_err(|_| CfgError::BlockIdsExhausted)?;
        self.next_block += 1;
        Ok(BlockId(id))
    }

    /// Appends `block` under a fresh id.
    pub fn add_block(&mut self, block: Block) -> Result<BlockId, CfgError> {
        let id = self.fresh_block_id()?;
        self.blocks.insert(id, block);
        Ok(id)
    }

    /// Inserts `block` under an id previously obtained from [`Self::fresh_block_id`].
    pub fn insert_block(&mut self, id: BlockId, block: Block) -> Result<(), CfgError> {
        if self.blocks.contains_key(&id) {
            return Err(CfgError::DuplicateBlock(id.0));
        }
        self.next_block = self.next_block.max(u64::from(id.0) + 1);
        self.blocks.insert(id, block);
        Ok(())
    }

    pub fn set_terminator(&mut self, id: BlockId, terminator: Terminator) -> Result<(), CfgError> {
        let block = self
            .blocks
            .get_mut(&id)
            .ok_or(CfgError::UnknownBlock(id.0))?;
        block.terminator = terminator;
        Ok(())
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(&id)
    }

    /// Looks up a block, reporting a missing id as an error.
    pub fn get(&self, id: BlockId) -> Result<&Block, CfgError> {
        self.blocks.get(&id).ok_or(CfgError::UnknownBlock(id.0))
    }

    pub fn get_mut(&mut self, id: BlockId) -> Result<&mut Block, CfgError> {
        self.blocks.get_mut(&id).ok_or(CfgError::UnknownBlock(id.0))
    }

    /// Blocks in insertion order. The iterator is lazy and can be cloned to restart it.
    pub fn blocks_in_order(&self) -> impl Iterator<Item = (BlockId, &Block)> + Clone + '_ {
        self.blocks.iter().map(|(id, block)| (*id, block))
    }

    /// Block ids in insertion order.
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks.keys().copied().collect()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.blocks.contains_key(&id)
    }

    /// Position of a block in emission order.
    pub fn position(&self, id: BlockId) -> Option<usize> {
        self.blocks.get_index_of(&id)
    }

    /// Moves `id` so that it is emitted directly after `anchor`.
    pub fn move_after(&mut self, id: BlockId, anchor: BlockId) -> Result<(), CfgError> {
        let from = self.position(id).ok_or(CfgError::UnknownBlock(id.0))?;
        let anchor_at = self.position(anchor).ok_or(CfgError::UnknownBlock(anchor.0))?;
        let to = if from <= anchor_at { anchor_at } else { anchor_at + 1 };
        self.blocks.move_index(from, to);
        Ok(())
    }

    /// Moves `id` so that it is emitted directly before `anchor`.
    pub fn move_before(&mut self, id: BlockId, anchor: BlockId) -> Result<(), CfgError> {
        let from = self.position(id).ok_or(CfgError::UnknownBlock(id.0))?;
        let anchor_at = self.position(anchor).ok_or(CfgError::UnknownBlock(anchor.0))?;
        let to = if from < anchor_at { anchor_at - 1 } else { anchor_at };
        self.blocks.move_index(from, to);
        Ok(())
    }

    /// Moves `id` to the start of the emission order.
    pub fn move_to_front(&mut self, id: BlockId) -> Result<(), CfgError> {
        let from = self.position(id).ok_or(CfgError::UnknownBlock(id.0))?;
        self.blocks.move_index(from, 0);
        Ok(())
    }

    /// Map from each block to the blocks that transfer to it (with multiplicity removed).
    pub fn predecessors(&self) -> HashMap<BlockId, Vec<BlockId>> {
        let mut preds: HashMap<BlockId, Vec<BlockId>> =
            self.blocks.keys().map(|id| (*id, Vec::new())).collect();
        for (id, block) in &self.blocks {
            for succ in block.terminator.successors() {
                let entry = preds.entry(succ).or_default();
                if !entry.contains(id) {
                    entry.push(*id);
                }
            }
        }
        preds
    }

    /// Blocks reachable from the entry through terminator edges.
    pub fn reachable(&self) -> HashSet<BlockId> {
        let mut seen = HashSet::new();
        let mut stack = vec![self.entry];
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(block) = self.blocks.get(&id) {
                stack.extend(block.terminator.successors());
            }
        }
        seen
    }

    /// True once the function has been flattened.
    pub fn is_flattened(&self) -> bool {
        self.blocks.values().any(|b| b.terminator.is_dispatch())
    }

    /// Declared type of a parameter, local, or global.
    pub fn var_type(&self, name: &str) -> Option<Ty> {
        if let Some(ty) = self.locals.get(name) {
            return Some(*ty);
        }
        if let Some(p) = self.params.iter().find(|p| p.name == name) {
            return Some(p.ty);
        }
        self.globals.get(name).map(|g| Ty::Scalar(g.ty))
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.var_type(name).is_some()
    }

    pub fn add_param(&mut self, name: impl Into<String>, ty: Ty) -> Result<(), CfgError> {
        let name = name.into();
        if self.is_declared(&name) {
            return Err(CfgError::DuplicateVariable(name));
        }
        self.params.push(Param { name, ty });
        Ok(())
    }

    pub fn declare_local(&mut self, name: impl Into<String>, ty: Ty) -> Result<(), CfgError> {
        let name = name.into();
        if self.is_declared(&name) {
            return Err(CfgError::DuplicateVariable(name));
        }
        self.locals.insert(name, ty);
        Ok(())
    }

    pub fn declare_global(
        &mut self,
        name: impl Into<String>,
        global: Global,
    ) -> Result<(), CfgError> {
        let name = name.into();
        if self.is_declared(&name) {
            return Err(CfgError::DuplicateVariable(name));
        }
        self.globals.insert(name, global);
        Ok(())
    }

    /// Declares a new local whose name starts with `prefix` and collides with nothing.
    pub fn fresh_local(&mut self, prefix: &str, ty: Ty) -> String {
        let mut name = prefix.to_string();
        let mut n = 1;
        while self.is_declared(&name) {
            name = format!("{prefix}_{n}");
            n += 1;
        }
        self.locals.insert(name.clone(), ty);
        name
    }

    /// Checks the structural invariants of the CFG.
    pub fn validate(&self) -> Result<(), CfgError> {
        if self.blocks.is_empty() {
            return Err(CfgError::Empty);
        }
        if !self.blocks.contains_key(&self.entry) {
            return Err(CfgError::MissingEntry(self.entry.0));
        }
        for (id, block) in &self.blocks {
            for target in block.terminator.successors() {
                if !self.blocks.contains_key(&target) {
                    return Err(CfgError::DanglingTarget {
                        from: id.0,
                        to: target.0,
                    });
                }
            }
            let mut unknown = None;
            let mut check = |name: &str| {
                if unknown.is_none() && !self.is_declared(name) {
                    unknown = Some(name.to_string());
                }
            };
            block.stmts.iter().for_each(|s| s.visit_vars(&mut check));
            block.terminator.visit_vars(&mut check);
            if let Some(name) = unknown {
                return Err(CfgError::UnknownVariable { block: id.0, name });
            }
        }
        Ok(())
    }

    /// Builds a petgraph view of the CFG for dominator and loop analysis.
    pub fn to_graph(&self) -> CfgGraph {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();
        for id in self.blocks.keys() {
            nodes.insert(*id, graph.add_node(*id));
        }
        for (id, block) in &self.blocks {
            let from = nodes[id];
            let mut link = |to: &BlockId, edge: EdgeType| {
                if let Some(&target) = nodes.get(to) {
                    graph.add_edge(from, target, edge);
                }
            };
            match &block.terminator {
                Terminator::Fallthrough { next } => link(next, EdgeType::Fallthrough),
                Terminator::Branch {
                    then_to, else_to, ..
                } => {
                    link(then_to, EdgeType::BranchTrue);
                    link(else_to, EdgeType::BranchFalse);
                }
                Terminator::Dispatch { table, .. } => {
                    table.iter().for_each(|t| link(t, EdgeType::Dispatch))
                }
                Terminator::Return { .. } | Terminator::Unreachable => {}
            }
        }
        let entry = nodes
            .get(&self.entry)
            .copied()
            .unwrap_or_else(|| NodeIndex::new(0));
        CfgGraph {
            graph,
            nodes,
            entry,
        }
    }

    /// Total number of statements across all blocks.
    pub fn stmt_count(&self) -> usize {
        self.blocks.values().map(|b| b.stmts.len()).sum()
    }
}

/// Serialized form of a [`FunctionCfg`]: blocks as an ordered list carrying their ids.
#[derive(Serialize, Deserialize)]
struct CfgRepr {
    name: String,
    #[serde(default)]
    params: Vec<Param>,
    #[serde(default)]
    ret: Option<ScalarTy>,
    #[serde(default)]
    locals: IndexMap<String, Ty>,
    #[serde(default)]
    globals: IndexMap<String, Global>,
    entry: BlockId,
    blocks: Vec<BlockRepr>,
}

#[derive(Serialize, Deserialize)]
struct BlockRepr {
    id: BlockId,
    #[serde(default)]
    stmts: Vec<Stmt>,
    terminator: Terminator,
    #[serde(default)]
    provenance: Provenance,
}

impl From<FunctionCfg> for CfgRepr {
    fn from(cfg: FunctionCfg) -> Self {
        Self {
            name: cfg.name,
            params: cfg.params,
            ret: cfg.ret,
            locals: cfg.locals,
            globals: cfg.globals,
            entry: cfg.entry,
            blocks: cfg
                .blocks
                .into_iter()
                .map(|(id, b)| BlockRepr {
                    id,
                    stmts: b.stmts,
                    terminator: b.terminator,
                    provenance: b.provenance,
                })
                .collect(),
        }
    }
}

impl TryFrom<CfgRepr> for FunctionCfg {
    type Error = CfgError;

    fn try_from(repr: CfgRepr) -> Result<Self, Self::Error> {
        let mut cfg = Self::new(repr.name);
        cfg.params = repr.params;
        cfg.ret = repr.ret;
        cfg.locals = repr.locals;
        cfg.globals = repr.globals;
        for b in repr.blocks {
            cfg.insert_block(
                b.id,
                Block {
                    stmts: b.stmts,
                    terminator: b.terminator,
                    provenance: b.provenance,
                },
            )?;
        }
        cfg.entry = repr.entry;
        cfg.validate()?;
        Ok(cfg)
    }
}
