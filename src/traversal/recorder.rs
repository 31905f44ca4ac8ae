//! Traversal recorders.
//!
//! A recorder accumulates the walk's visited edges into an auxiliary
//! directed graph for later inspection or rendering. Its boolean verdict
//! doubles as a secondary filter: returning `false` keeps the edge's target
//! out of the frontier.

use std::collections::HashMap;
use std::sync::Arc;

use petgraph::graphmap::DiGraphMap;
use tracing::warn;

use crate::error::Result;
use crate::session::AnalysisSession;
use crate::traversal::flows::LoopFoldTable;
use crate::types::{GraphNode, NodeId, NodeKind, NodeRef};

// ---------------------------------------------------------------------------
// RecordGraph
// ---------------------------------------------------------------------------

/// Per-node metadata kept for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordNode {
    pub line: u32,
    pub kind: NodeKind,
}

/// Per-edge metadata; the straight recorder attaches the control-flow
/// branch label.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordEdge {
    pub flow_label: Option<String>,
}

/// The auxiliary graph a recorder builds, keyed by stable node index.
#[derive(Default)]
pub struct RecordGraph {
    graph: DiGraphMap<NodeId, RecordEdge>,
    attrs: HashMap<NodeId, RecordNode>,
}

impl RecordGraph {
    fn add_node(&mut self, node: &GraphNode) {
        self.graph.add_node(node.id);
        self.attrs.insert(
            node.id,
            RecordNode {
                line: node.line,
                kind: node.kind,
            },
        );
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId, edge: RecordEdge) {
        self.graph.add_edge(from, to, edge);
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains_node(&self, id: NodeId) -> bool {
        self.graph.contains_node(id)
    }

    pub fn contains_edge(&self, from: NodeId, to: NodeId) -> bool {
        self.graph.contains_edge(from, to)
    }

    pub fn node_attrs(&self, id: NodeId) -> Option<&RecordNode> {
        self.attrs.get(&id)
    }

    pub fn edge(&self, from: NodeId, to: NodeId) -> Option<&RecordEdge> {
        self.graph.edge_weight(from, to)
    }

    /// All recorded edges as (from, to) pairs, sorted.
    pub fn edges(&self) -> Vec<(NodeId, NodeId)> {
        let mut edges: Vec<(NodeId, NodeId)> =
            self.graph.all_edges().map(|(a, b, _)| (a, b)).collect();
        edges.sort_unstable();
        edges
    }
}

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

/// Observes every accepted traversal edge.
pub trait Recorder {
    /// Called once per resolved origin before the walk starts.
    fn record_origin(&mut self, session: &AnalysisSession, origin: &GraphNode) -> Result<()>;

    /// Called once per accepted (current, next) edge. Returning `Ok(false)`
    /// prunes `next` from the frontier.
    fn record(&mut self, session: &AnalysisSession, from: &NodeRef, to: &NodeRef) -> Result<bool>;

    fn graph(&self) -> &RecordGraph;
}

// ---------------------------------------------------------------------------
// FlowRecorder
// ---------------------------------------------------------------------------

/// Default recorder: stores every visited edge, never filters.
#[derive(Default)]
pub struct FlowRecorder {
    storage: RecordGraph,
}

impl FlowRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Recorder for FlowRecorder {
    fn record_origin(&mut self, _session: &AnalysisSession, origin: &GraphNode) -> Result<()> {
        self.storage.add_node(origin);
        Ok(())
    }

    fn record(&mut self, _session: &AnalysisSession, from: &NodeRef, to: &NodeRef) -> Result<bool> {
        self.storage.add_node(&to.node);
        self.storage.add_edge(from.id(), to.id(), RecordEdge::default());
        Ok(true)
    }

    fn graph(&self) -> &RecordGraph {
        &self.storage
    }
}

// ---------------------------------------------------------------------------
// StraightRecorder
// ---------------------------------------------------------------------------

/// Acyclic recorder for forward control-flow walks.
///
/// Applies the loop-fold substitution at the recording stage so the stored
/// graph is guaranteed cycle-free, and attaches the control-flow branch
/// label to each recorded edge. A backward jump with no learned
/// substitution prunes that edge (`Ok(false)`).
#[derive(Default)]
pub struct StraightRecorder {
    storage: RecordGraph,
    folds: LoopFoldTable,
}

impl StraightRecorder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Recorder for StraightRecorder {
    fn record_origin(&mut self, _session: &AnalysisSession, origin: &GraphNode) -> Result<()> {
        self.storage.add_node(origin);
        Ok(())
    }

    fn record(&mut self, session: &AnalysisSession, from: &NodeRef, to: &NodeRef) -> Result<bool> {
        self.folds.learn_from(session, &from.node)?;

        let mut target = Arc::clone(&to.node);
        if target.id < from.id() {
            if self.folds.contains(target.id) {
                let resolved = self.folds.resolve(target.id);
                match session.node(resolved)? {
                    Some(node) => target = node,
                    None => return Ok(false),
                }
            } else {
                warn!(
                    from = from.id(),
                    to = target.id,
                    "backward jump without a learned loop substitution; pruning recorded edge"
                );
                return Ok(false);
            }
        }

        let flow_label = session.cfg_flow_label(from.id(), target.id)?;
        self.storage.add_node(&target);
        self.storage
            .add_edge(from.id(), target.id, RecordEdge { flow_label });
        Ok(true)
    }

    fn graph(&self) -> &RecordGraph {
        &self.storage
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
