//! taintgraph — taint-style traversal engine over code property graphs.
//!
//! Rule-driven breadth-first walks (origins / sanitizers / terminals) over
//! the structural, control-flow, data-flow, and call relations of a
//! program graph, backed by a monotonic multi-relation cache that mirrors
//! remote edges and an optional prefetch worker pool that keeps it warm.

pub mod cache;
pub mod config;
pub mod error;
pub mod observability;
pub mod session;
pub mod store;
pub mod traversal;
pub mod types;

#[cfg(test)]
pub(crate) mod testutil;

pub use cache::{CacheSource, RelationCache};
pub use cache::prefetch::{PrefetchPool, PrefetchTask, RelationPrefetchTask};
pub use config::{AnalysisConfig, PrefetchSettings, StoreProfile};
pub use error::{Result, TaintGraphError};
pub use session::AnalysisSession;
pub use store::{GraphStoreClient, SqliteConnector, SqliteStore, StoreConnector};
pub use traversal::{
    CfgForwardFlow, CfgSuccessorFlow, FlowRecorder, FlowStrategy, GlobalCfgForwardFlow,
    GlobalPdgBackwardFlow, GraphTraversal, LoopFoldTable, PdgBackwardFlow, RecordGraph, Recorder,
    StraightRecorder,
};
pub use types::{
    Direction, EdgeMeta, FileId, FuncId, GraphNode, NeighborEdge, NodeId, NodeKind, NodeRef,
    Relation,
};
