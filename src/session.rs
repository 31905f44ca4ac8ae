//! Analysis session: one store connection plus the shared relation cache.
//!
//! The session's accessors are the per-relation query layer. Each one
//! consults the cache first and falls through to the store client on a
//! miss, writing the fetched slice back so the next caller — foreground or
//! prefetch — hits. The whole "check flag → fetch → write" compound runs
//! under the cache's sharded fetch lock so two threads racing on the same
//! cold slice neither duplicate the remote query nor interleave partial
//! writes.

use std::sync::Arc;

use tracing::warn;

use crate::cache::{CacheSource, RelationCache};
use crate::config::AnalysisConfig;
use crate::error::{Result, TaintGraphError};
use crate::store::sqlite::SqliteConnector;
use crate::store::{GraphStoreClient, StoreConnector};
use crate::types::{Direction, GraphNode, NeighborEdge, NodeId, NodeKind, NodeRef, Relation};

/// Depth cap for structural descendant filtering.
const MAX_AST_FILTER_DEPTH: u32 = 20;

// ---------------------------------------------------------------------------
// AnalysisSession
// ---------------------------------------------------------------------------

/// A live analysis session against one graph store.
///
/// The cache may be shared with any number of prefetch workers; the client
/// connection is exclusively this session's. Sessions are not `Sync` — one
/// foreground traversal drives one session.
pub struct AnalysisSession {
    client: Box<dyn GraphStoreClient>,
    connector: Arc<dyn StoreConnector>,
    cache: Arc<RelationCache>,
    use_cache: bool,
    source_tag: CacheSource,
}

impl AnalysisSession {
    /// Validate the config and open a session with a fresh cache.
    pub fn connect(config: &AnalysisConfig) -> Result<Self> {
        config.validate()?;
        let connector: Arc<dyn StoreConnector> =
            Arc::new(SqliteConnector::new(config.store.clone())?);
        Self::with_connector(connector, Arc::new(RelationCache::new()), config.use_cache)
    }

    /// Open a session over an existing connector and (possibly shared)
    /// cache.
    pub fn with_connector(
        connector: Arc<dyn StoreConnector>,
        cache: Arc<RelationCache>,
        use_cache: bool,
    ) -> Result<Self> {
        let client = connector.connect()?;
        Ok(Self {
            client,
            connector,
            cache,
            use_cache,
            source_tag: CacheSource::Traversal,
        })
    }

    /// A worker-side session: independent connection, shared cache, writes
    /// tagged as prefetch so hits are attributable.
    pub(crate) fn prefetch_peer(
        connector: Arc<dyn StoreConnector>,
        cache: Arc<RelationCache>,
    ) -> Result<Self> {
        let client = connector.connect()?;
        Ok(Self {
            client,
            connector,
            cache,
            use_cache: true,
            source_tag: CacheSource::Prefetch,
        })
    }

    pub fn cache(&self) -> &Arc<RelationCache> {
        &self.cache
    }

    pub fn connector(&self) -> &Arc<dyn StoreConnector> {
        &self.connector
    }

    /// Best-effort cache-hit count for this session's shared cache.
    pub fn cache_hits(&self) -> u64 {
        self.cache.cache_hits()
    }

    /// Best-effort count of hits served from prefetched slices.
    pub fn prefetch_hits(&self) -> u64 {
        self.cache.prefetch_hits()
    }

    // -- node lookup ---------------------------------------------------

    /// Node by stable index, cache-first.
    pub fn node(&self, id: NodeId) -> Result<Option<Arc<GraphNode>>> {
        if self.use_cache {
            if let Some(node) = self.cache.get_node(id) {
                return Ok(Some(node));
            }
        }
        let fetched = self.client.node_by_stable_id(id)?;
        if self.use_cache {
            if let Some(node) = &fetched {
                self.cache.add_node(node, self.source_tag);
            }
        }
        Ok(fetched)
    }

    /// Node by the store's ephemeral session identity. Uncached — session
    /// identities are not stable enough to mirror.
    pub fn node_by_session_id(&self, id: i64) -> Result<Option<Arc<GraphNode>>> {
        self.client.node_by_session_id(id)
    }

    // -- generic relation accessor ---------------------------------------

    /// Neighbor list for (node, relation, direction), ordered ascending by
    /// stable index. Serves from the cache when that slice is marked
    /// fetched; otherwise queries the store and records the complete
    /// answer.
    pub fn relation_neighbors(
        &self,
        node: &Arc<GraphNode>,
        relation: Relation,
        direction: Direction,
    ) -> Result<Vec<NodeRef>> {
        if !self.use_cache {
            return Ok(to_refs(self.fetch(node, relation, direction)?));
        }
        let _guard = self.cache.fetch_lock(node.id, relation, direction);
        if let Some(cached) = self.cache.neighbors(relation, node, direction) {
            return Ok(cached);
        }
        let edges = self.fetch(node, relation, direction)?;
        self.cache
            .add_neighbors(relation, node, direction, &edges, self.source_tag);
        Ok(to_refs(edges))
    }

    fn fetch(
        &self,
        node: &Arc<GraphNode>,
        relation: Relation,
        direction: Direction,
    ) -> Result<Vec<NeighborEdge>> {
        match direction {
            Direction::Outbound => self.client.fetch_outbound(node, relation),
            Direction::Inbound => self.client.fetch_inbound(node, relation),
        }
    }

    // -- control flow ----------------------------------------------------

    pub fn cfg_successors(&self, node: &Arc<GraphNode>) -> Result<Vec<NodeRef>> {
        self.relation_neighbors(node, Relation::Cfg, Direction::Outbound)
    }

    pub fn cfg_predecessors(&self, node: &Arc<GraphNode>) -> Result<Vec<NodeRef>> {
        self.relation_neighbors(node, Relation::Cfg, Direction::Inbound)
    }

    /// Branch label on the control-flow edge `from → to`. Reads the cached
    /// edge first; falls back to the store.
    pub fn cfg_flow_label(&self, from: NodeId, to: NodeId) -> Result<Option<String>> {
        if self.use_cache {
            if let Some(label) = self.cache.cfg_edge_label(from, to) {
                return Ok(Some(label));
            }
        }
        self.client.flow_label(from, to)
    }

    // -- data flow -------------------------------------------------------

    /// Definitions reaching this use (data-flow predecessors). The returned
    /// handles carry the edge's variable name as `taint_var`.
    pub fn pdg_def_nodes(&self, node: &Arc<GraphNode>) -> Result<Vec<NodeRef>> {
        self.relation_neighbors(node, Relation::Pdg, Direction::Inbound)
    }

    /// Uses reached from this definition (data-flow successors).
    pub fn pdg_use_nodes(&self, node: &Arc<GraphNode>) -> Result<Vec<NodeRef>> {
        self.relation_neighbors(node, Relation::Pdg, Direction::Outbound)
    }

    // -- call graph ------------------------------------------------------

    /// Declarations a call site resolves to.
    pub fn cg_decl_nodes(&self, call: &Arc<GraphNode>) -> Result<Vec<NodeRef>> {
        self.relation_neighbors(call, Relation::Cg, Direction::Outbound)
    }

    /// Call sites targeting a declaration.
    pub fn cg_call_sites(&self, decl: &Arc<GraphNode>) -> Result<Vec<NodeRef>> {
        self.relation_neighbors(decl, Relation::Cg, Direction::Inbound)
    }

    // -- structure -------------------------------------------------------

    pub fn ast_children(&self, node: &Arc<GraphNode>) -> Result<Vec<NodeRef>> {
        self.relation_neighbors(node, Relation::Ast, Direction::Outbound)
    }

    pub fn ast_parents(&self, node: &Arc<GraphNode>) -> Result<Vec<NodeRef>> {
        self.relation_neighbors(node, Relation::Ast, Direction::Inbound)
    }

    /// The i-th structural child. Fails with full context when the index is
    /// out of range; use [`ast_ith_child_opt`](Self::ast_ith_child_opt) to
    /// get `None` instead.
    pub fn ast_ith_child(&self, node: &Arc<GraphNode>, i: usize) -> Result<NodeRef> {
        let children = self.ast_children(node)?;
        let available = children.len();
        children
            .into_iter()
            .nth(i)
            .ok_or(TaintGraphError::ChildIndex {
                node: node.id,
                index: i,
                available,
            })
    }

    /// The i-th structural child, or `None` when the node has fewer
    /// children.
    pub fn ast_ith_child_opt(&self, node: &Arc<GraphNode>, i: usize) -> Result<Option<NodeRef>> {
        Ok(self.ast_children(node)?.into_iter().nth(i))
    }

    /// The first structural parent. Same error contract as
    /// [`ast_ith_child`](Self::ast_ith_child).
    pub fn ast_parent(&self, node: &Arc<GraphNode>) -> Result<NodeRef> {
        let parents = self.ast_parents(node)?;
        let available = parents.len();
        parents
            .into_iter()
            .next()
            .ok_or(TaintGraphError::ChildIndex {
                node: node.id,
                index: 0,
                available,
            })
    }

    pub fn ast_parent_opt(&self, node: &Arc<GraphNode>) -> Result<Option<NodeRef>> {
        Ok(self.ast_parents(node)?.into_iter().next())
    }

    /// Structural descendants (including `node` itself) whose kind passes
    /// the filter, breadth-first, capped at `MAX_AST_FILTER_DEPTH` levels.
    pub fn filter_ast_descendants(
        &self,
        node: &Arc<GraphNode>,
        kinds: &[NodeKind],
    ) -> Result<Vec<NodeRef>> {
        let mut result = Vec::new();
        let mut frontier = vec![Arc::clone(node)];
        let mut depth = 0;
        while !frontier.is_empty() && depth <= MAX_AST_FILTER_DEPTH {
            let mut next = Vec::new();
            for current in frontier {
                if kinds.contains(&current.kind) {
                    result.push(NodeRef::new(Arc::clone(&current)));
                }
                for child in self.ast_children(&current)? {
                    next.push(child.node);
                }
            }
            frontier = next;
            depth += 1;
        }
        result.sort_by_key(|r| r.id());
        Ok(result)
    }

    // -- function boundaries ---------------------------------------------

    /// Return expressions of a function declaration: the control-flow
    /// predecessors of its artificial exit marker. A declaration without a
    /// marker degrades to an empty list with a warning.
    pub fn function_return_exprs(&self, decl: &Arc<GraphNode>) -> Result<Vec<NodeRef>> {
        match self.client.function_exit(decl)? {
            Some(exit) => self.cfg_predecessors(&exit),
            None => {
                warn!(decl = decl.id, "function declaration has no exit marker");
                Ok(Vec::new())
            }
        }
    }

    /// First statements of a function declaration: the control-flow
    /// successors of its artificial entry marker.
    pub fn function_entry_exprs(&self, decl: &Arc<GraphNode>) -> Result<Vec<NodeRef>> {
        match self.client.function_entry(decl)? {
            Some(entry) => self.cfg_successors(&entry),
            None => {
                warn!(decl = decl.id, "function declaration has no entry marker");
                Ok(Vec::new())
            }
        }
    }

    // -- code ------------------------------------------------------------

    /// Source text for a node. Serves the code pool, then the node's own
    /// captured fragment, then a kind-dispatched reconstruction; kinds with
    /// no reconstruction produce a sentinel placeholder and a warning
    /// rather than failing the traversal.
    pub fn node_code(&self, node: &GraphNode) -> String {
        if let Some(code) = self.cache.get_code(node.id) {
            return code;
        }
        let reconstructed = match node.kind {
            NodeKind::Var => node.name.as_ref().map(|name| format!("${name}")),
            NodeKind::Name => node.name.clone(),
            _ => node.code.clone(),
        };
        match reconstructed {
            Some(code) => {
                self.cache.add_code(node.id, code.clone());
                code
            }
            None => {
                warn!(node = node.id, kind = %node.kind, "no code reconstruction for node kind");
                format!("<unsupported:{}>", node.kind)
            }
        }
    }
}

fn to_refs(edges: Vec<NeighborEdge>) -> Vec<NodeRef> {
    let mut refs: Vec<NodeRef> = edges
        .into_iter()
        .map(|edge| NodeRef::with_taint_var(edge.neighbor, edge.meta.var))
        .collect();
    refs.sort_by_key(|r| r.id());
    refs
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{cfg_edge, child_node, node, pdg_edge, seeded_store};
    use crate::types::EdgeMeta;

    fn session_over(
        nodes: &[GraphNode],
        edges: &[(NodeId, NodeId, Relation, EdgeMeta)],
    ) -> (AnalysisSession, tempfile::TempDir) {
        let (connector, dir) = seeded_store(nodes, edges);
        let session = AnalysisSession::with_connector(
            Arc::new(connector),
            Arc::new(RelationCache::new()),
            true,
        )
        .unwrap();
        (session, dir)
    }

    #[test]
    fn cold_query_fetches_then_hits() {
        let (session, _dir) = session_over(
            &[node(1, NodeKind::Assign, 1), node(2, NodeKind::Echo, 2)],
            &[(1, 2, Relation::Cfg, cfg_edge(None))],
        );
        let anchor = session.node(1).unwrap().unwrap();

        assert_eq!(session.cache_hits(), 0);
        let first = session.cfg_successors(&anchor).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(session.cache_hits(), 0, "first query was a miss");

        let second = session.cfg_successors(&anchor).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(session.cache_hits(), 1, "second query served from cache");
    }

    #[test]
    fn empty_slice_is_cached_too() {
        let (session, _dir) = session_over(&[node(1, NodeKind::Assign, 1)], &[]);
        let anchor = session.node(1).unwrap().unwrap();

        assert!(session.cfg_successors(&anchor).unwrap().is_empty());
        assert!(session.cfg_successors(&anchor).unwrap().is_empty());
        assert_eq!(session.cache_hits(), 1);
    }

    #[test]
    fn pdg_defs_attach_taint_var() {
        let (session, _dir) = session_over(
            &[node(1, NodeKind::Assign, 1), node(2, NodeKind::Echo, 2)],
            &[(1, 2, Relation::Pdg, pdg_edge("user"))],
        );
        let usage = session.node(2).unwrap().unwrap();

        let defs = session.pdg_def_nodes(&usage).unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].id(), 1);
        assert_eq!(defs[0].taint_var.as_deref(), Some("user"));

        // and again, via the cache
        let defs = session.pdg_def_nodes(&usage).unwrap();
        assert_eq!(defs[0].taint_var.as_deref(), Some("user"));
    }

    #[test]
    fn ith_child_error_carries_context() {
        let (session, _dir) = session_over(
            &[
                node(1, NodeKind::Assign, 1),
                child_node(2, NodeKind::Var, 1, 0),
            ],
            &[(1, 2, Relation::Ast, EdgeMeta::default())],
        );
        let anchor = session.node(1).unwrap().unwrap();

        assert_eq!(session.ast_ith_child(&anchor, 0).unwrap().id(), 2);

        let err = session.ast_ith_child(&anchor, 5).unwrap_err();
        match err {
            TaintGraphError::ChildIndex {
                node,
                index,
                available,
            } => {
                assert_eq!(node, 1);
                assert_eq!(index, 5);
                assert_eq!(available, 1);
            }
            other => panic!("unexpected error: {other}"),
        }

        // the opt variant degrades to None instead
        assert!(session.ast_ith_child_opt(&anchor, 5).unwrap().is_none());
    }

    #[test]
    fn filter_descendants_finds_nested_calls() {
        // assign(1) -> var(2), call(3); call(3) -> arglist(4) -> call(5)
        let (session, _dir) = session_over(
            &[
                node(1, NodeKind::Assign, 1),
                child_node(2, NodeKind::Var, 1, 0),
                child_node(3, NodeKind::Call, 1, 1),
                child_node(4, NodeKind::ArgList, 1, 0),
                child_node(5, NodeKind::Call, 1, 0),
            ],
            &[
                (1, 2, Relation::Ast, EdgeMeta::default()),
                (1, 3, Relation::Ast, EdgeMeta::default()),
                (3, 4, Relation::Ast, EdgeMeta::default()),
                (4, 5, Relation::Ast, EdgeMeta::default()),
            ],
        );
        let anchor = session.node(1).unwrap().unwrap();

        let calls = session
            .filter_ast_descendants(&anchor, &[NodeKind::Call])
            .unwrap();
        let ids: Vec<NodeId> = calls.iter().map(|r| r.id()).collect();
        assert_eq!(ids, vec![3, 5]);
    }

    #[test]
    fn function_boundaries_resolve_via_markers() {
        let mut entry = node(11, NodeKind::FuncEntry, 1);
        entry.func_id = 10;
        let mut exit = node(19, NodeKind::FuncExit, 9);
        exit.func_id = 10;
        let (session, _dir) = session_over(
            &[
                node(10, NodeKind::FuncDecl, 1),
                entry,
                node(12, NodeKind::Assign, 2),
                node(15, NodeKind::Return, 5),
                exit,
            ],
            &[
                (11, 12, Relation::Cfg, cfg_edge(None)),
                (12, 15, Relation::Cfg, cfg_edge(None)),
                (15, 19, Relation::Cfg, cfg_edge(None)),
            ],
        );
        let decl = session.node(10).unwrap().unwrap();

        let entries = session.function_entry_exprs(&decl).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id(), 12);

        let returns = session.function_return_exprs(&decl).unwrap();
        assert_eq!(returns.len(), 1);
        assert_eq!(returns[0].id(), 15);
    }

    #[test]
    fn missing_markers_degrade_to_empty() {
        let (session, _dir) = session_over(&[node(10, NodeKind::FuncDecl, 1)], &[]);
        let decl = session.node(10).unwrap().unwrap();
        assert!(session.function_entry_exprs(&decl).unwrap().is_empty());
        assert!(session.function_return_exprs(&decl).unwrap().is_empty());
    }

    #[test]
    fn node_code_falls_back_to_sentinel() {
        let mut with_code = node(1, NodeKind::Assign, 1);
        with_code.code = Some("$a = $_GET['x'];".into());
        let mut var = node(2, NodeKind::Var, 1);
        var.name = Some("a".into());
        let (session, _dir) = session_over(&[with_code, var, node(3, NodeKind::Other, 2)], &[]);

        let assign = session.node(1).unwrap().unwrap();
        assert_eq!(session.node_code(&assign), "$a = $_GET['x'];");
        let var = session.node(2).unwrap().unwrap();
        assert_eq!(session.node_code(&var), "$a");
        let other = session.node(3).unwrap().unwrap();
        assert_eq!(session.node_code(&other), "<unsupported:OTHER>");
    }

    #[test]
    fn cfg_flow_label_reads_cached_edge() {
        let (session, _dir) = session_over(
            &[node(1, NodeKind::If, 1), node(2, NodeKind::Echo, 2)],
            &[(1, 2, Relation::Cfg, cfg_edge(Some("True")))],
        );
        // warm the cache so the label comes from the mirror
        let anchor = session.node(1).unwrap().unwrap();
        session.cfg_successors(&anchor).unwrap();

        assert_eq!(session.cfg_flow_label(1, 2).unwrap().as_deref(), Some("True"));
        // cold pair falls through to the store
        assert!(session.cfg_flow_label(2, 1).unwrap().is_none());
    }

    #[test]
    fn uncached_session_skips_the_cache() {
        let (connector, _dir) = seeded_store(
            &[node(1, NodeKind::Assign, 1), node(2, NodeKind::Echo, 2)],
            &[(1, 2, Relation::Cfg, cfg_edge(None))],
        );
        let session = AnalysisSession::with_connector(
            Arc::new(connector),
            Arc::new(RelationCache::new()),
            false,
        )
        .unwrap();
        let anchor = session.node(1).unwrap().unwrap();

        session.cfg_successors(&anchor).unwrap();
        session.cfg_successors(&anchor).unwrap();
        assert_eq!(session.cache_hits(), 0);
        assert!(!session.cache().fetched(Relation::Cfg, 1, Direction::Outbound));
    }
}
