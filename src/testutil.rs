//! Shared fixtures for unit tests: node builders and synthetic-graph
//! seeding over the SQLite backend.

use std::sync::Arc;

use crate::config::StoreProfile;
use crate::store::sqlite::{SqliteConnector, SqliteStore};
use crate::types::{EdgeMeta, GraphNode, NodeId, NodeKind, Relation};

/// A node with sensible defaults; `session_id` mirrors the stable id in
/// fixtures (the SQLite backend assigns the real one on fetch).
pub(crate) fn node(id: NodeId, kind: NodeKind, line: u32) -> GraphNode {
    GraphNode {
        id,
        session_id: id,
        kind,
        line,
        file_id: 1,
        func_id: 0,
        child_num: -1,
        name: None,
        flags: None,
        code: None,
    }
}

pub(crate) fn func_node(id: NodeId, kind: NodeKind, line: u32, func_id: i64) -> GraphNode {
    GraphNode {
        func_id,
        ..node(id, kind, line)
    }
}

pub(crate) fn child_node(id: NodeId, kind: NodeKind, line: u32, child_num: i32) -> GraphNode {
    GraphNode {
        child_num,
        ..node(id, kind, line)
    }
}

pub(crate) fn arc_node(id: NodeId, kind: NodeKind, line: u32) -> Arc<GraphNode> {
    Arc::new(node(id, kind, line))
}

pub(crate) fn cfg_edge(flow_label: Option<&str>) -> EdgeMeta {
    EdgeMeta {
        flow_label: flow_label.map(str::to_owned),
        var: None,
    }
}

pub(crate) fn pdg_edge(var: &str) -> EdgeMeta {
    EdgeMeta {
        flow_label: None,
        var: Some(var.to_owned()),
    }
}

/// A store seeded into a temp file so independent connections (prefetch
/// workers) see the same graph. Returns the connector plus the guard that
/// keeps the file alive.
pub(crate) fn seeded_store(
    nodes: &[GraphNode],
    edges: &[(NodeId, NodeId, Relation, EdgeMeta)],
) -> (SqliteConnector, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("graph.db");
    let store = SqliteStore::open(&path).expect("open seeded store");
    store.insert_nodes(nodes).expect("seed nodes");
    for (source, target, relation, meta) in edges {
        store
            .insert_edge(*source, *target, *relation, meta.clone())
            .expect("seed edge");
    }
    let connector = SqliteConnector::new(StoreProfile::new(&path)).expect("connector");
    (connector, dir)
}
