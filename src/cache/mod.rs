//! Multi-relation local cache.
//!
//! An in-process mirror of the four relation graphs plus a node property
//! pool and a code-string pool. For every (node, relation, direction) the
//! cache tracks whether that slice has been fully fetched; once marked, the
//! cached answer is complete and authoritative for the rest of the session.
//! The cache is monotonic — no eviction, no refresh — which is sound
//! because the underlying program graph is read-only during analysis.
//!
//! The cache never fetches. `neighbors` returning `None` means "not yet
//! fetched, caller must query the store"; `Some(vec![])` is a valid,
//! complete empty answer. Keeping transport out keeps this a pure
//! memoization layer shared verbatim between the foreground session and
//! any number of prefetch workers.

pub mod prefetch;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use petgraph::graphmap::DiGraphMap;

use crate::types::{Direction, EdgeMeta, GraphNode, NeighborEdge, NodeId, NodeRef, Relation};

/// Shard count for the fetch locks. Power of two so the index reduces to a
/// mask.
const FETCH_SHARDS: usize = 64;

// ---------------------------------------------------------------------------
// CacheSource
// ---------------------------------------------------------------------------

/// Which writer populated a cache slice. Lets hit counters attribute a hit
/// to the prefetch pool separately from ordinary traversal writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Traversal,
    Prefetch,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// Per-node fetch-completeness state for one relation: the two independent
/// direction flags, each remembering who set it. `None` = not fetched.
#[derive(Debug, Clone, Copy, Default)]
struct FetchState {
    inbound: Option<CacheSource>,
    outbound: Option<CacheSource>,
}

impl FetchState {
    fn get(&self, direction: Direction) -> Option<CacheSource> {
        match direction {
            Direction::Inbound => self.inbound,
            Direction::Outbound => self.outbound,
        }
    }

    fn set(&mut self, direction: Direction, source: CacheSource) {
        match direction {
            Direction::Inbound => self.inbound = Some(source),
            Direction::Outbound => self.outbound = Some(source),
        }
    }
}

/// One relation's mirror: the directed edge graph plus per-node fetch state.
#[derive(Default)]
struct RelationMirror {
    graph: DiGraphMap<NodeId, EdgeMeta>,
    state: HashMap<NodeId, FetchState>,
}

impl RelationMirror {
    fn touch(&mut self, id: NodeId) {
        self.graph.add_node(id);
        self.state.entry(id).or_default();
    }
}

struct CacheInner {
    nodes: HashMap<NodeId, Arc<GraphNode>>,
    node_source: HashMap<NodeId, CacheSource>,
    code: HashMap<NodeId, String>,
    mirrors: [RelationMirror; 4],
}

impl CacheInner {
    /// Register a node in the pool and touch its fetch state in every
    /// mirror. First writer wins; later copies are silently ignored.
    fn add_node(&mut self, node: &Arc<GraphNode>, source: CacheSource) {
        for mirror in &mut self.mirrors {
            mirror.touch(node.id);
        }
        if !self.nodes.contains_key(&node.id) {
            self.nodes.insert(node.id, Arc::clone(node));
            self.node_source.insert(node.id, source);
        }
    }
}

// ---------------------------------------------------------------------------
// RelationCache
// ---------------------------------------------------------------------------

/// The shared relation cache.
///
/// All state sits behind one mutex; every mutation (flag transition plus
/// the associated node/edge insertions) is applied inside a single critical
/// section, so a concurrent reader can never observe a direction marked
/// fetched alongside a partially populated edge list.
///
/// The sharded [`fetch_lock`](Self::fetch_lock) guards are separate: the
/// query layer holds one across its whole "check flag → fetch from store →
/// write back" compound so two threads racing on the same cold slice do not
/// issue duplicate remote queries. No thread may retain references into the
/// cache across that compound without its guard held.
pub struct RelationCache {
    inner: Mutex<CacheInner>,
    fetch_shards: Vec<Mutex<()>>,
    hits: AtomicU64,
    prefetch_hits: AtomicU64,
}

impl Default for RelationCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RelationCache {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                nodes: HashMap::new(),
                node_source: HashMap::new(),
                code: HashMap::new(),
                mirrors: Default::default(),
            }),
            fetch_shards: (0..FETCH_SHARDS).map(|_| Mutex::new(())).collect(),
            hits: AtomicU64::new(0),
            prefetch_hits: AtomicU64::new(0),
        }
    }

    // -- node pool -----------------------------------------------------

    pub fn get_node(&self, id: NodeId) -> Option<Arc<GraphNode>> {
        self.inner.lock().nodes.get(&id).cloned()
    }

    /// Insert a node if absent. Duplicates are silently ignored.
    pub fn add_node(&self, node: &Arc<GraphNode>, source: CacheSource) {
        self.inner.lock().add_node(node, source);
    }

    /// Which writer first registered this node, if cached.
    pub fn node_source(&self, id: NodeId) -> Option<CacheSource> {
        self.inner.lock().node_source.get(&id).copied()
    }

    // -- relation mirrors ----------------------------------------------

    /// Record a fully fetched neighbor list for (node, relation, direction)
    /// and register the endpoint nodes and edges. Idempotent: if the
    /// direction is already marked fetched the call is a no-op, preserving
    /// the original answer.
    pub fn add_neighbors(
        &self,
        relation: Relation,
        node: &Arc<GraphNode>,
        direction: Direction,
        edges: &[NeighborEdge],
        source: CacheSource,
    ) {
        let mut inner = self.inner.lock();
        inner.add_node(node, source);
        let state = inner.mirrors[relation.index()]
            .state
            .get(&node.id)
            .copied()
            .unwrap_or_default();
        if state.get(direction).is_some() {
            return;
        }
        for edge in edges {
            inner.add_node(&edge.neighbor, source);
        }
        let mirror = &mut inner.mirrors[relation.index()];
        for edge in edges {
            let (from, to) = match direction {
                Direction::Outbound => (node.id, edge.neighbor.id),
                Direction::Inbound => (edge.neighbor.id, node.id),
            };
            // no parallel edges within a relation; first meta wins
            if !mirror.graph.contains_edge(from, to) {
                mirror.graph.add_edge(from, to, edge.meta.clone());
            }
        }
        mirror
            .state
            .entry(node.id)
            .or_default()
            .set(direction, source);
    }

    /// The cached neighbor list for (node, relation, direction), ordered
    /// ascending by stable index, or `None` when that slice has not been
    /// fetched yet. Data-flow variable names are attached to the returned
    /// handles' transient annotation.
    ///
    /// A `Some` return counts as a cache hit; hits on slices populated by a
    /// prefetch worker are additionally counted as prefetch hits.
    pub fn neighbors(
        &self,
        relation: Relation,
        node: &Arc<GraphNode>,
        direction: Direction,
    ) -> Option<Vec<NodeRef>> {
        let mut inner = self.inner.lock();
        inner.add_node(node, CacheSource::Traversal);
        let mirror = &inner.mirrors[relation.index()];
        let source = mirror.state.get(&node.id).and_then(|s| s.get(direction))?;

        let petgraph_dir = match direction {
            Direction::Outbound => petgraph::Direction::Outgoing,
            Direction::Inbound => petgraph::Direction::Incoming,
        };
        let mut result = Vec::new();
        for neighbor_id in mirror.graph.neighbors_directed(node.id, petgraph_dir) {
            let (from, to) = match direction {
                Direction::Outbound => (node.id, neighbor_id),
                Direction::Inbound => (neighbor_id, node.id),
            };
            let taint_var = mirror
                .graph
                .edge_weight(from, to)
                .and_then(|meta| meta.var.clone());
            if let Some(neighbor) = inner.nodes.get(&neighbor_id) {
                result.push(NodeRef::with_taint_var(Arc::clone(neighbor), taint_var));
            }
        }
        result.sort_by_key(|r| r.id());

        self.hits.fetch_add(1, Ordering::Relaxed);
        if source == CacheSource::Prefetch {
            self.prefetch_hits.fetch_add(1, Ordering::Relaxed);
        }
        Some(result)
    }

    /// Whether (node, relation, direction) has been marked fetched.
    pub fn fetched(&self, relation: Relation, node: NodeId, direction: Direction) -> bool {
        self.inner.lock().mirrors[relation.index()]
            .state
            .get(&node)
            .map(|s| s.get(direction).is_some())
            .unwrap_or(false)
    }

    /// Branch label on a cached control-flow edge, if that edge is present.
    pub fn cfg_edge_label(&self, from: NodeId, to: NodeId) -> Option<String> {
        self.inner.lock().mirrors[Relation::Cfg.index()]
            .graph
            .edge_weight(from, to)
            .and_then(|meta| meta.flow_label.clone())
    }

    // -- code pool -----------------------------------------------------

    /// Cache a reconstructed code string. First writer wins.
    pub fn add_code(&self, id: NodeId, code: impl Into<String>) {
        self.inner.lock().code.entry(id).or_insert_with(|| code.into());
    }

    pub fn get_code(&self, id: NodeId) -> Option<String> {
        self.inner.lock().code.get(&id).cloned()
    }

    // -- fetch locks ---------------------------------------------------

    /// The shard guard for (node, relation, direction). The query layer
    /// holds this across its check → fetch → write compound.
    pub fn fetch_lock(
        &self,
        node: NodeId,
        relation: Relation,
        direction: Direction,
    ) -> MutexGuard<'_, ()> {
        let dir_bit = match direction {
            Direction::Inbound => 0usize,
            Direction::Outbound => 1usize,
        };
        let key = (node as u64 as usize)
            .wrapping_mul(8)
            .wrapping_add(relation.index() * 2 + dir_bit);
        self.fetch_shards[key % FETCH_SHARDS].lock()
    }

    // -- diagnostics ---------------------------------------------------

    /// Total cache hits. Best-effort under concurrency — a coarse
    /// diagnostic, not a transactional count.
    pub fn cache_hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Hits on slices that a prefetch worker populated.
    pub fn prefetch_hits(&self) -> u64 {
        self.prefetch_hits.load(Ordering::Relaxed)
    }

    /// Number of nodes in the pool.
    pub fn node_count(&self) -> usize {
        self.inner.lock().nodes.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
