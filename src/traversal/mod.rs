//! Rule-driven breadth-first graph traversal.
//!
//! A traversal is parameterized by a [`FlowStrategy`] (the step function),
//! ordered sanitizer and terminal rules, origins (literal seeds or
//! resolvers), and a [`Recorder`]. Candidates survive only if **every**
//! sanitizer returns false; survivors satisfying **any** terminal rule are
//! appended to the result set but still expand further. Revisit
//! suppression is keyed per origin, so reaching the same node from
//! different seeds counts as independent work and total expansion stays
//! bounded by seeds × reachable nodes even on cyclic graphs.

pub mod flows;
pub mod recorder;

pub use flows::{
    CfgForwardFlow, CfgSuccessorFlow, FlowStrategy, GlobalCfgForwardFlow, GlobalPdgBackwardFlow,
    LoopFoldTable, PdgBackwardFlow,
};
pub use recorder::{FlowRecorder, RecordGraph, Recorder, StraightRecorder};

use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::error::{Result, TaintGraphError};
use crate::session::AnalysisSession;
use crate::types::{GraphNode, NodeId, NodeRef};

// ---------------------------------------------------------------------------
// Rule types
// ---------------------------------------------------------------------------

/// A predicate over a candidate node. Sanitizer rules return true to mean
/// "already neutralized, stop tracking"; terminal rules return true to mark
/// a reportable end state.
pub type Rule = Box<dyn Fn(&AnalysisSession, &NodeRef) -> bool>;

/// Resolves seed nodes at init time from the live session.
pub type OriginResolver = Box<dyn Fn(&AnalysisSession) -> Result<Vec<Arc<GraphNode>>>>;

enum OriginSource {
    Node(Arc<GraphNode>),
    Resolver(OriginResolver),
}

/// A frontier entry: the node handle plus the seed it was reached from.
struct Frontier {
    current: NodeRef,
    origin: NodeId,
}

// ---------------------------------------------------------------------------
// GraphTraversal
// ---------------------------------------------------------------------------

/// The breadth-first traversal engine.
///
/// There is deliberately no implicit default sanitizer: an empty sanitizer
/// list admits every candidate, and all rule state is passed explicitly at
/// construction.
pub struct GraphTraversal<'a> {
    session: &'a AnalysisSession,
    strategy: Box<dyn FlowStrategy>,
    origin_sources: Vec<OriginSource>,
    origins: Vec<Arc<GraphNode>>,
    sanitizers: Vec<Rule>,
    terminals: Vec<Rule>,
    recorder: Box<dyn Recorder>,
    /// (origin, node) → visit count, reset at the start of every run.
    visits: HashMap<(NodeId, NodeId), u32>,
    results: Vec<NodeRef>,
}

impl<'a> GraphTraversal<'a> {
    /// A traversal with the default step (control-flow successors) and the
    /// default recorder (record everything).
    pub fn new(session: &'a AnalysisSession) -> Self {
        Self {
            session,
            strategy: Box::new(CfgSuccessorFlow),
            origin_sources: Vec::new(),
            origins: Vec::new(),
            sanitizers: Vec::new(),
            terminals: Vec::new(),
            recorder: Box::new(FlowRecorder::new()),
            visits: HashMap::new(),
            results: Vec::new(),
        }
    }

    pub fn with_strategy(mut self, strategy: Box<dyn FlowStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Add literal seed nodes.
    pub fn with_origin_nodes(mut self, nodes: impl IntoIterator<Item = Arc<GraphNode>>) -> Self {
        self.origin_sources
            .extend(nodes.into_iter().map(OriginSource::Node));
        self
    }

    /// Add an origin resolver, evaluated once at init.
    pub fn with_origin_resolver(mut self, resolver: OriginResolver) -> Self {
        self.origin_sources.push(OriginSource::Resolver(resolver));
        self
    }

    pub fn with_sanitizer(mut self, rule: Rule) -> Self {
        self.sanitizers.push(rule);
        self
    }

    pub fn with_terminal(mut self, rule: Rule) -> Self {
        self.terminals.push(rule);
        self
    }

    pub fn with_recorder(mut self, recorder: Box<dyn Recorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Resolve origins. Idempotent: once seeds exist, calling this again is
    /// a no-op. Fails when nothing seeds the walk.
    pub fn init_traversal(&mut self) -> Result<()> {
        if !self.origins.is_empty() {
            return Ok(());
        }
        if self.origin_sources.is_empty() {
            return Err(TaintGraphError::EmptyOrigin);
        }
        let mut origins = Vec::new();
        for source in &self.origin_sources {
            match source {
                OriginSource::Node(node) => origins.push(Arc::clone(node)),
                OriginSource::Resolver(resolver) => origins.extend(resolver(self.session)?),
            }
        }
        if origins.is_empty() {
            return Err(TaintGraphError::EmptyOrigin);
        }
        self.origins = origins;
        Ok(())
    }

    /// Run the walk to completion.
    pub fn run(&mut self) -> Result<()> {
        self.visits.clear();
        self.results.clear();
        self.init_traversal()?;

        let session = self.session;
        let mut queue: VecDeque<Frontier> = VecDeque::new();
        for origin in &self.origins {
            self.recorder.record_origin(session, origin)?;
            queue.push_back(Frontier {
                current: NodeRef::new(Arc::clone(origin)),
                origin: origin.id,
            });
        }

        while let Some(frontier) = queue.pop_front() {
            match self.visits.entry((frontier.origin, frontier.current.id())) {
                Entry::Occupied(mut seen) => {
                    *seen.get_mut() += 1;
                    continue;
                }
                Entry::Vacant(slot) => {
                    slot.insert(1);
                }
            }

            let candidates = self.strategy.expand(session, &frontier.current)?;
            let mut accepted = Vec::new();
            for candidate in candidates {
                // a candidate survives only if every sanitizer says "not
                // sanitized"
                if self
                    .sanitizers
                    .iter()
                    .any(|rule| rule(session, &candidate))
                {
                    continue;
                }
                if self.terminals.iter().any(|rule| rule(session, &candidate)) {
                    self.results.push(candidate.clone());
                }
                accepted.push(candidate);
            }

            for next in accepted {
                if self.recorder.record(session, &frontier.current, &next)? {
                    queue.push_back(Frontier {
                        current: next,
                        origin: frontier.origin,
                    });
                }
            }
        }
        Ok(())
    }

    /// Terminal nodes reached, in discovery order.
    pub fn get_result(&self) -> &[NodeRef] {
        &self.results
    }

    /// The recorder's accumulated graph.
    pub fn get_record(&self) -> &RecordGraph {
        self.recorder.graph()
    }

    /// Resolved seeds (empty before init).
    pub fn origins(&self) -> &[Arc<GraphNode>] {
        &self.origins
    }

    /// How many distinct (origin, node) pairs the last run expanded.
    pub fn expanded_pairs(&self) -> usize {
        self.visits.len()
    }

    /// How often a node was popped under a given origin in the last run.
    pub fn visit_count(&self, origin: NodeId, node: NodeId) -> u32 {
        self.visits.get(&(origin, node)).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
