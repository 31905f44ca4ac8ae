//! SQLite reference backend for the graph store contract.
//!
//! Holds a local mirror of the program graph: one `nodes` table keyed by
//! the stable index, one `edges` table keyed by (source, target, relation).
//! Every query goes through [`rusqlite::Connection::prepare_cached`], so
//! the first call compiles the statement and subsequent calls reuse it.

use std::path::Path;
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};

use crate::config::StoreProfile;
use crate::error::Result;
use crate::store::{GraphStoreClient, StoreConnector};
use crate::types::{EdgeMeta, GraphNode, NeighborEdge, NodeId, NodeKind, Relation};

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

const CREATE_NODES: &str = "\
CREATE TABLE IF NOT EXISTS nodes (
  id INTEGER PRIMARY KEY,
  kind TEXT NOT NULL,
  line INTEGER NOT NULL DEFAULT 0,
  file_id INTEGER NOT NULL DEFAULT 0,
  func_id INTEGER NOT NULL DEFAULT 0,
  child_num INTEGER NOT NULL DEFAULT -1,
  name TEXT,
  flags TEXT,
  code TEXT
)";

const CREATE_EDGES: &str = "\
CREATE TABLE IF NOT EXISTS edges (
  source_id INTEGER NOT NULL,
  target_id INTEGER NOT NULL,
  relation TEXT NOT NULL,
  flow_label TEXT,
  var TEXT,
  PRIMARY KEY (source_id, target_id, relation),
  FOREIGN KEY (source_id) REFERENCES nodes(id),
  FOREIGN KEY (target_id) REFERENCES nodes(id)
)";

const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id, relation)",
    "CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id, relation)",
    "CREATE INDEX IF NOT EXISTS idx_nodes_func_kind ON nodes(func_id, kind)",
];

/// Open a connection and apply the schema.
pub fn initialize_database(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    // WAL so prefetch workers can read while another connection writes
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.execute(CREATE_NODES, [])?;
    conn.execute(CREATE_EDGES, [])?;
    for ddl in CREATE_INDEXES {
        conn.execute(ddl, [])?;
    }
    Ok(conn)
}

// ---------------------------------------------------------------------------
// SQL constants
// ---------------------------------------------------------------------------

const NODE_COLUMNS: &str = "\
n.rowid AS session_id, n.id, n.kind, n.line, n.file_id, n.func_id, \
n.child_num, n.name, n.flags, n.code";

const INSERT_NODE_SQL: &str = "\
INSERT OR IGNORE INTO nodes (id, kind, line, file_id, func_id, child_num, name, flags, code)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

const INSERT_EDGE_SQL: &str = "\
INSERT OR IGNORE INTO edges (source_id, target_id, relation, flow_label, var)
VALUES (?1, ?2, ?3, ?4, ?5)";

// ---------------------------------------------------------------------------
// Row conversion
// ---------------------------------------------------------------------------

fn row_to_node(row: &rusqlite::Row<'_>) -> rusqlite::Result<GraphNode> {
    let kind: String = row.get("kind")?;
    Ok(GraphNode {
        id: row.get("id")?,
        session_id: row.get("session_id")?,
        kind: NodeKind::from_tag(&kind),
        line: row.get("line")?,
        file_id: row.get("file_id")?,
        func_id: row.get("func_id")?,
        child_num: row.get("child_num")?,
        name: row.get("name")?,
        flags: row.get("flags")?,
        code: row.get("code")?,
    })
}

// ---------------------------------------------------------------------------
// SqliteStore
// ---------------------------------------------------------------------------

/// A [`GraphStoreClient`] over a local SQLite mirror of the program graph.
///
/// Also exposes the loader methods used to populate the mirror (and to seed
/// synthetic graphs in tests).
pub struct SqliteStore {
    conn: Connection,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the mirror at `path` and apply the schema.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            conn: initialize_database(path)?,
        })
    }

    /// Wrap an existing connection (e.g. `:memory:` in tests).
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    // -- loader --------------------------------------------------------

    /// Insert a node. Existing rows win — the stable index is authoritative.
    pub fn insert_node(&self, node: &GraphNode) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(INSERT_NODE_SQL)?;
        stmt.execute(params![
            node.id,
            node.kind.as_str(),
            node.line,
            node.file_id,
            node.func_id,
            node.child_num,
            node.name,
            node.flags,
            node.code,
        ])?;
        Ok(())
    }

    pub fn insert_nodes(&self, nodes: &[GraphNode]) -> Result<()> {
        for node in nodes {
            self.insert_node(node)?;
        }
        Ok(())
    }

    /// Insert an edge of the given relation. Duplicate (source, target,
    /// relation) triples are ignored — the graph has no parallel edges
    /// within one relation.
    pub fn insert_edge(
        &self,
        source: NodeId,
        target: NodeId,
        relation: Relation,
        meta: EdgeMeta,
    ) -> Result<()> {
        let mut stmt = self.conn.prepare_cached(INSERT_EDGE_SQL)?;
        stmt.execute(params![
            source,
            target,
            relation.as_str(),
            meta.flow_label,
            meta.var,
        ])?;
        Ok(())
    }

    // -- internals -----------------------------------------------------

    fn fetch_neighbors(
        &self,
        node: NodeId,
        relation: Relation,
        outbound: bool,
    ) -> Result<Vec<NeighborEdge>> {
        let sql = if outbound {
            format!(
                "SELECT {NODE_COLUMNS}, e.flow_label, e.var \
                 FROM edges e JOIN nodes n ON n.id = e.target_id \
                 WHERE e.source_id = ?1 AND e.relation = ?2 \
                 ORDER BY n.id ASC"
            )
        } else {
            format!(
                "SELECT {NODE_COLUMNS}, e.flow_label, e.var \
                 FROM edges e JOIN nodes n ON n.id = e.source_id \
                 WHERE e.target_id = ?1 AND e.relation = ?2 \
                 ORDER BY n.id ASC"
            )
        };
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![node, relation.as_str()], |row| {
            let neighbor = row_to_node(row)?;
            let meta = EdgeMeta {
                flow_label: row.get("flow_label")?,
                var: row.get("var")?,
            };
            Ok(NeighborEdge {
                neighbor: Arc::new(neighbor),
                meta,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
    }

    fn function_marker(&self, decl: &GraphNode, kind: NodeKind) -> Result<Option<Arc<GraphNode>>> {
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM nodes n \
             WHERE n.func_id = ?1 AND n.kind = ?2 LIMIT 1"
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let node = stmt
            .query_row(params![decl.id, kind.as_str()], row_to_node)
            .optional()?;
        Ok(node.map(Arc::new))
    }
}

impl GraphStoreClient for SqliteStore {
    fn fetch_outbound(&self, node: &GraphNode, relation: Relation) -> Result<Vec<NeighborEdge>> {
        self.fetch_neighbors(node.id, relation, true)
    }

    fn fetch_inbound(&self, node: &GraphNode, relation: Relation) -> Result<Vec<NeighborEdge>> {
        self.fetch_neighbors(node.id, relation, false)
    }

    fn node_by_stable_id(&self, id: NodeId) -> Result<Option<Arc<GraphNode>>> {
        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes n WHERE n.id = ?1");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let node = stmt.query_row(params![id], row_to_node).optional()?;
        Ok(node.map(Arc::new))
    }

    fn node_by_session_id(&self, id: i64) -> Result<Option<Arc<GraphNode>>> {
        let sql = format!("SELECT {NODE_COLUMNS} FROM nodes n WHERE n.rowid = ?1");
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let node = stmt.query_row(params![id], row_to_node).optional()?;
        Ok(node.map(Arc::new))
    }

    fn function_entry(&self, decl: &GraphNode) -> Result<Option<Arc<GraphNode>>> {
        self.function_marker(decl, NodeKind::FuncEntry)
    }

    fn function_exit(&self, decl: &GraphNode) -> Result<Option<Arc<GraphNode>>> {
        self.function_marker(decl, NodeKind::FuncExit)
    }

    fn flow_label(&self, from: NodeId, to: NodeId) -> Result<Option<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT flow_label FROM edges \
             WHERE source_id = ?1 AND target_id = ?2 AND relation = ?3",
        )?;
        let label: Option<Option<String>> = stmt
            .query_row(params![from, to, Relation::Cfg.as_str()], |row| row.get(0))
            .optional()?;
        Ok(label.flatten())
    }
}

// ---------------------------------------------------------------------------
// SqliteConnector
// ---------------------------------------------------------------------------

/// Mints independent [`SqliteStore`] connections against one database file.
#[derive(Debug, Clone)]
pub struct SqliteConnector {
    profile: StoreProfile,
}

impl SqliteConnector {
    /// Validate the profile and build a connector. Fails fast on malformed
    /// connection parameters.
    pub fn new(profile: StoreProfile) -> Result<Self> {
        profile.validate()?;
        Ok(Self { profile })
    }

    pub fn profile(&self) -> &StoreProfile {
        &self.profile
    }
}

impl StoreConnector for SqliteConnector {
    fn connect(&self) -> Result<Box<dyn GraphStoreClient>> {
        Ok(Box::new(SqliteStore::open(&self.profile.database)?))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
