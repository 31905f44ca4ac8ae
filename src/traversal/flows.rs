//! Flow strategies: the pluggable step functions of the traversal engine.
//!
//! A strategy maps the current frontier node to its candidate successors
//! for one walk style — control-flow forward or data-flow backward, each in
//! an intraprocedural and an interprocedural (call-depth-bounded) variant.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::error::Result;
use crate::session::AnalysisSession;
use crate::types::{FuncId, GraphNode, NodeId, NodeKind, NodeRef};

/// Kinds the interprocedural flows resolve through the call relation.
const CALL_KINDS: [NodeKind; 3] = [NodeKind::Call, NodeKind::MethodCall, NodeKind::StaticCall];

/// Call-depth bound the interprocedural flows default to.
const DEFAULT_MAX_CALL_DEPTH: u32 = 3;

/// Cap on substitution-chain walks; beyond this the chain is assumed
/// pathological and resolution stops at the node reached so far.
const MAX_RESOLVE_STEPS: usize = 64;

// ---------------------------------------------------------------------------
// FlowStrategy
// ---------------------------------------------------------------------------

/// One atomic traversal step: the candidate nodes reachable from `current`.
pub trait FlowStrategy {
    fn expand(&mut self, session: &AnalysisSession, current: &NodeRef) -> Result<Vec<NodeRef>>;
}

// ---------------------------------------------------------------------------
// LoopFoldTable
// ---------------------------------------------------------------------------

/// Substitution table mapping a loop's internal back-edge target to the
/// loop's exit successor, learned incrementally while the walk passes loop
/// structures.
///
/// Resolution follows chains transitively (nested loops) with iterative
/// path compression, so repeated lookups stay flat and no recursion depth
/// is consumed on pathological chains.
#[derive(Default)]
pub struct LoopFoldTable {
    map: HashMap<NodeId, NodeId>,
}

impl LoopFoldTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a substitution. The first mapping for a node wins.
    pub fn learn(&mut self, from: NodeId, to: NodeId) {
        if from != to {
            self.map.entry(from).or_insert(to);
        }
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.map.contains_key(&id)
    }

    /// Follow the substitution chain from `id` to its end, compressing the
    /// path on the way out.
    pub fn resolve(&mut self, id: NodeId) -> NodeId {
        let mut path = Vec::new();
        let mut current = id;
        while let Some(&next) = self.map.get(&current) {
            if path.len() >= MAX_RESOLVE_STEPS {
                warn!(start = id, "loop substitution chain too long; stopping resolution early");
                break;
            }
            path.push(current);
            current = next;
        }
        for visited in path {
            self.map.insert(visited, current);
        }
        current
    }

    /// Inspect the walk's position and learn loop substitutions from the
    /// surrounding structure:
    ///
    /// - inside a `for` head: the update expression (3rd child) maps to the
    ///   exit successor of the condition (2nd child);
    /// - inside a `while` head: the condition node maps to its own exit
    ///   successor;
    /// - at a `foreach` head: the node maps to its own exit successor.
    ///
    /// The exit successor is the second control-flow successor (successor
    /// lists are ordered ascending by index, and the exit lies beyond the
    /// loop body). Loop heads without one are logged and skipped.
    pub fn learn_from(&mut self, session: &AnalysisSession, node: &Arc<GraphNode>) -> Result<()> {
        if let Some(parent) = session.ast_parent_opt(node)? {
            match parent.kind() {
                NodeKind::For => {
                    let head = &parent.node;
                    if let Some(update) = session.ast_ith_child_opt(head, 2)? {
                        if !self.contains(update.id()) {
                            if let Some(cond) = session.ast_ith_child_opt(head, 1)? {
                                match session.cfg_successors(&cond.node)?.into_iter().nth(1) {
                                    Some(exit) => self.learn(update.id(), exit.id()),
                                    None => warn!(
                                        loop_head = head.id,
                                        "for-loop condition has no exit successor"
                                    ),
                                }
                            }
                        }
                    }
                    return Ok(());
                }
                NodeKind::While => {
                    match session.cfg_successors(node)?.into_iter().nth(1) {
                        Some(exit) => self.learn(node.id, exit.id()),
                        None => warn!(node = node.id, "while condition has no exit successor"),
                    }
                    return Ok(());
                }
                _ => {}
            }
        }
        if node.kind == NodeKind::Foreach {
            match session.cfg_successors(node)?.into_iter().nth(1) {
                Some(exit) => self.learn(node.id, exit.id()),
                None => warn!(node = node.id, "foreach head has no exit successor"),
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FuncDepth
// ---------------------------------------------------------------------------

/// Per-function recursion depth for interprocedural walks.
///
/// Keys by function id and keeps the first-seen depth: a function reached
/// again through a different call chain retains its original depth, which
/// may under- or over-bound recursion relative to the later chain. This is
/// intentional, observable behavior — changing it would change which paths
/// the bound prunes.
struct FuncDepth {
    map: HashMap<FuncId, u32>,
    max: u32,
}

impl FuncDepth {
    fn new(max: u32) -> Self {
        Self {
            map: HashMap::new(),
            max,
        }
    }

    /// The function's depth, registering 0 on first sight.
    fn current(&mut self, func: FuncId) -> u32 {
        *self.map.entry(func).or_insert(0)
    }

    fn at_limit(&mut self, func: FuncId) -> bool {
        self.current(func) >= self.max
    }

    /// Register a callee one level below the caller (first-seen wins).
    fn enter(&mut self, callee: FuncId, caller_depth: u32) {
        self.map.entry(callee).or_insert(caller_depth + 1);
    }
}

// ---------------------------------------------------------------------------
// Intraprocedural flows
// ---------------------------------------------------------------------------

/// The default step: plain control-flow successors, no loop handling.
#[derive(Default)]
pub struct CfgSuccessorFlow;

impl FlowStrategy for CfgSuccessorFlow {
    fn expand(&mut self, session: &AnalysisSession, current: &NodeRef) -> Result<Vec<NodeRef>> {
        session.cfg_successors(&current.node)
    }
}

/// Intraprocedural forward control-flow walk with loop folding.
///
/// A successor whose index is lower than the current node's indicates a
/// backward jump into an already-visited loop body; it is substituted with
/// the loop's learned exit successor, transitively. An unresolved backward
/// jump is logged and kept raw — best-effort degradation, the revisit
/// suppression still bounds the walk.
#[derive(Default)]
pub struct CfgForwardFlow {
    folds: LoopFoldTable,
}

impl CfgForwardFlow {
    pub fn new() -> Self {
        Self::default()
    }

    fn fold(
        &mut self,
        session: &AnalysisSession,
        current: &NodeRef,
        next: NodeRef,
    ) -> Result<NodeRef> {
        if next.id() >= current.id() {
            return Ok(next);
        }
        if self.folds.contains(next.id()) {
            let target = self.folds.resolve(next.id());
            if let Some(node) = session.node(target)? {
                return Ok(NodeRef::new(node));
            }
        }
        warn!(
            from = current.id(),
            to = next.id(),
            "unresolved loop back-edge; keeping raw successor"
        );
        Ok(next)
    }
}

impl FlowStrategy for CfgForwardFlow {
    fn expand(&mut self, session: &AnalysisSession, current: &NodeRef) -> Result<Vec<NodeRef>> {
        self.folds.learn_from(session, &current.node)?;
        let mut result = Vec::new();
        for next in session.cfg_successors(&current.node)? {
            result.push(self.fold(session, current, next)?);
        }
        Ok(result)
    }
}

/// Intraprocedural backward data-flow walk: the definitions reaching the
/// current use.
#[derive(Default)]
pub struct PdgBackwardFlow;

impl FlowStrategy for PdgBackwardFlow {
    fn expand(&mut self, session: &AnalysisSession, current: &NodeRef) -> Result<Vec<NodeRef>> {
        session.pdg_def_nodes(&current.node)
    }
}

// ---------------------------------------------------------------------------
// Interprocedural flows
// ---------------------------------------------------------------------------

/// Interprocedural forward control-flow walk: loop folding as in
/// [`CfgForwardFlow`], plus expansion into callee entry statements at call
/// sites, bounded by per-function call depth.
pub struct GlobalCfgForwardFlow {
    local: CfgForwardFlow,
    depth: FuncDepth,
}

impl GlobalCfgForwardFlow {
    pub fn new(max_call_depth: u32) -> Self {
        Self {
            local: CfgForwardFlow::new(),
            depth: FuncDepth::new(max_call_depth),
        }
    }
}

impl Default for GlobalCfgForwardFlow {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CALL_DEPTH)
    }
}

impl FlowStrategy for GlobalCfgForwardFlow {
    fn expand(&mut self, session: &AnalysisSession, current: &NodeRef) -> Result<Vec<NodeRef>> {
        let node = &current.node;
        if self.depth.at_limit(node.func_id) {
            return Ok(Vec::new());
        }
        let mut result = self.local.expand(session, current)?;

        let caller_depth = self.depth.current(node.func_id);
        for call in session.filter_ast_descendants(node, &CALL_KINDS)? {
            let Some(decl) = session.cg_decl_nodes(&call.node)?.into_iter().next() else {
                continue;
            };
            let entries = session.function_entry_exprs(&decl.node)?;
            if entries.len() > 1 {
                warn!(decl = decl.id(), "declaration has multiple entry statements");
            }
            for entry in entries {
                self.depth.enter(entry.node.func_id, caller_depth);
                result.push(entry);
            }
        }
        Ok(result)
    }
}

/// Interprocedural backward data-flow walk: reaching definitions, plus — at
/// assignments whose right-hand side contains call expressions — the return
/// expressions of each resolved callee, bounded by per-function call depth.
pub struct GlobalPdgBackwardFlow {
    depth: FuncDepth,
}

impl GlobalPdgBackwardFlow {
    pub fn new(max_call_depth: u32) -> Self {
        Self {
            depth: FuncDepth::new(max_call_depth),
        }
    }
}

impl Default for GlobalPdgBackwardFlow {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CALL_DEPTH)
    }
}

impl FlowStrategy for GlobalPdgBackwardFlow {
    fn expand(&mut self, session: &AnalysisSession, current: &NodeRef) -> Result<Vec<NodeRef>> {
        let node = &current.node;
        if self.depth.at_limit(node.func_id) {
            return Ok(Vec::new());
        }
        let mut result = session.pdg_def_nodes(node)?;

        if !node.kind.is_assignment() {
            return Ok(result);
        }
        let caller_depth = self.depth.current(node.func_id);
        let Some(rhs) = session.ast_ith_child_opt(node, 1)? else {
            return Ok(result);
        };
        for call in session.filter_ast_descendants(&rhs.node, &CALL_KINDS)? {
            let Some(decl) = session.cg_decl_nodes(&call.node)?.into_iter().next() else {
                continue;
            };
            for ret in session.function_return_exprs(&decl.node)? {
                self.depth.enter(ret.node.func_id, caller_depth);
                result.push(ret);
            }
        }
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
