/// Module for computing structural metrics that quantify control-flow obfuscation.
///
/// Metrics cover block and edge counts, reachability, injected dead blocks, dispatcher width,
/// loop count, and dominator/post-dominator overlap, folded into a composite potency score.
/// The module provides functions to collect metrics from a `FunctionCfg`, compare pre- and
/// post-transform states, and compute dominator/post-dominator pairs.
///
/// # Usage
/// ```rust,ignore
/// let cfg: FunctionCfg = serde_json::from_str(&json)?;
/// let metrics = metrics::collect_metrics(&cfg)?;
/// println!("{}", serde_json::to_string_pretty(&metrics)?);
/// ```
use petgraph::{
    algo::dominators::simple_fast,
    graph::{DiGraph, NodeIndex},
    visit::Reversed,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tangle_core::cfg_ir::{BlockId, EdgeType, FunctionCfg, Provenance, Terminator};
use tangle_core::loops::loop_headers;
use tangle_utils::errors::MetricsError;
use tracing::debug;

/// Represents a set of structural metrics for evaluating control-flow obfuscation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Number of basic blocks in the CFG.
    pub block_cnt: usize,
    /// Number of control-flow edges (dispatch table entries count individually).
    pub edge_cnt: usize,
    /// Total number of statements.
    pub stmt_cnt: usize,
    /// Blocks with a static path from the entry.
    pub reachable_cnt: usize,
    /// Blocks injected behind false opaque predicates.
    pub dead_cnt: usize,
    /// Largest dispatch table, zero before flattening.
    pub dispatch_width: usize,
    /// Number of natural loop headers.
    pub loop_cnt: usize,
    /// Fraction of nodes whose immediate dominator is also their immediate post-dominator.
    pub dom_overlap: f64,
    /// Composite potency score (heuristic based on nodes, edges, and overlap).
    pub potency: f64,
}

/// Collects metrics from a function CFG.
///
/// # Arguments
/// * `cfg` - The function to measure. It must pass validation.
///
/// # Returns
/// A `Metrics` struct with computed metrics, or an error if the CFG is empty or invalid.
pub fn collect_metrics(cfg: &FunctionCfg) -> Result<Metrics, MetricsError> {
    if cfg.block_count() == 0 {
        return Err(MetricsError::EmptyCfg);
    }
    cfg.validate()?;

    let (graph, entry, exit) = with_virtual_exit(cfg);
    let (doms, post_doms) = dominator_pairs(&graph, entry, exit);
    let overlap = dom_overlap(&doms, &post_doms);

    let block_cnt = cfg.block_count();
    let edge_cnt = cfg
        .blocks_in_order()
        .map(|(_, b)| b.terminator.successors().len())
        .sum();
    let dispatch_width = cfg
        .blocks_in_order()
        .filter_map(|(_, b)| match &b.terminator {
            Terminator::Dispatch { table, .. } => Some(table.len()),
            _ => None,
        })
        .max()
        .unwrap_or(0);

    let metrics = Metrics {
        block_cnt,
        edge_cnt,
        stmt_cnt: cfg.stmt_count(),
        reachable_cnt: cfg.reachable().len(),
        dead_cnt: cfg
            .blocks_in_order()
            .filter(|(_, b)| b.provenance == Provenance::Dead)
            .count(),
        dispatch_width,
        loop_cnt: loop_headers(cfg).len(),
        dom_overlap: overlap,
        potency: score(overlap, block_cnt, edge_cnt),
    };
    debug!("metrics for `{}`: {:?}", cfg.name, metrics);
    Ok(metrics)
}

/// Builds the CFG graph plus a virtual exit node fed by every block without successors.
fn with_virtual_exit(
    cfg: &FunctionCfg,
) -> (DiGraph<Option<BlockId>, EdgeType>, NodeIndex, NodeIndex) {
    let view = cfg.to_graph();
    let mut graph = view.graph.map(|_, id| Some(*id), |_, e| *e);
    let exit = graph.add_node(None);
    for (id, block) in cfg.blocks_in_order() {
        if block.terminator.successors().is_empty() {
            graph.add_edge(view.nodes[&id], exit, EdgeType::Fallthrough);
        }
    }
    (graph, view.entry, exit)
}

type DominatorMap = HashMap<NodeIndex, NodeIndex>;

/// Computes dominator and post-dominator pairs for the CFG.
///
/// Uses `petgraph`'s `simple_fast` algorithm from the entry node for dominators and from the
/// virtual exit over the reversed graph for post-dominators.
///
/// # Returns
/// A tuple of two hash maps: (dominators, post-dominators), mapping node indices to their
/// immediate dominator/post-dominator.
fn dominator_pairs(
    g: &DiGraph<Option<BlockId>, EdgeType>,
    entry: NodeIndex,
    exit: NodeIndex,
) -> (DominatorMap, DominatorMap) {
    let doms = simple_fast(g, entry);
    let mut dom_map = HashMap::new();
    for n in g.node_indices() {
        if let Some(idom) = doms.immediate_dominator(n) {
            dom_map.insert(n, idom);
        }
    }

    let post = simple_fast(Reversed(g), exit);
    let mut pdom_map = HashMap::new();
    for n in g.node_indices() {
        if let Some(ipdom) = post.immediate_dominator(n) {
            pdom_map.insert(n, ipdom);
        }
    }

    (dom_map, pdom_map)
}

/// Computes the fraction of nodes whose immediate dominator equals their immediate
/// post-dominator. A higher overlap suggests a more linear CFG.
fn dom_overlap(doms: &DominatorMap, pdoms: &DominatorMap) -> f64 {
    let common = doms
        .iter()
        .filter(|(n, d)| pdoms.get(*n) == Some(*d))
        .count();
    if doms.is_empty() {
        0.0
    } else {
        common as f64 / doms.len() as f64
    }
}

/// Composite potency score: rewards more blocks and edges, penalizes linear structure.
fn score(overlap: f64, nodes: usize, edges: usize) -> f64 {
    5.0 * (nodes as f64).log2() + edges as f64 + 30.0 * (1.0 - overlap)
}

/// Difference in potency between two states, discounted by statement growth.
pub fn compare(before: &Metrics, after: &Metrics) -> f64 {
    after.potency - before.potency - 0.1 * (after.stmt_cnt as f64 - before.stmt_cnt as f64)
}
