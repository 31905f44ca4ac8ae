//! Graph store client contract.
//!
//! The program graph lives in an external store; the engine only ever talks
//! to it through [`GraphStoreClient`]. Each relation exposes an inbound and
//! an outbound fetch, both ordered ascending by the neighbor's stable index
//! and idempotent — repeated calls yield the same set. [`StoreConnector`]
//! mints independent client connections; every prefetch worker gets its
//! own, all sharing one relation cache.

pub mod sqlite;

pub use sqlite::{initialize_database, SqliteConnector, SqliteStore};

use std::sync::Arc;

use crate::error::Result;
use crate::types::{GraphNode, NeighborEdge, NodeId, Relation};

/// Query contract the engine requires from a graph store backend.
///
/// All calls are synchronous; any timeout or retry behavior is the
/// backend's responsibility.
pub trait GraphStoreClient: Send {
    /// Edges leaving `node` for `relation`, ordered ascending by the
    /// neighbor's stable index.
    fn fetch_outbound(&self, node: &GraphNode, relation: Relation) -> Result<Vec<NeighborEdge>>;

    /// Edges entering `node` for `relation`, ordered ascending by the
    /// neighbor's stable index.
    fn fetch_inbound(&self, node: &GraphNode, relation: Relation) -> Result<Vec<NeighborEdge>>;

    /// Look a node up by its stable index.
    fn node_by_stable_id(&self, id: NodeId) -> Result<Option<Arc<GraphNode>>>;

    /// Look a node up by its ephemeral per-session identity.
    fn node_by_session_id(&self, id: i64) -> Result<Option<Arc<GraphNode>>>;

    /// The artificial entry marker of a function declaration, if present.
    fn function_entry(&self, decl: &GraphNode) -> Result<Option<Arc<GraphNode>>>;

    /// The artificial exit marker of a function declaration, if present.
    fn function_exit(&self, decl: &GraphNode) -> Result<Option<Arc<GraphNode>>>;

    /// Branch label on the control-flow edge `from → to`, if any.
    fn flow_label(&self, from: NodeId, to: NodeId) -> Result<Option<String>>;
}

/// Mints fresh, independent store connections from one set of connection
/// parameters.
pub trait StoreConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn GraphStoreClient>>;
}
