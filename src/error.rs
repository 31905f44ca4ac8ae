//! Crate-wide error type and `Result` alias.

use crate::types::NodeId;

/// All failure modes surfaced by taintgraph.
#[derive(Debug, thiserror::Error)]
pub enum TaintGraphError {
    /// Malformed store-connection parameters. Fatal at session construction.
    #[error("invalid store configuration: {0}")]
    Config(String),

    /// A traversal was started with no literal seeds and no origin
    /// resolvers (or resolvers that produced nothing).
    #[error("traversal origin is empty; provide seed nodes or origin resolvers")]
    EmptyOrigin,

    /// A structural child/parent was requested beyond what the node has.
    /// Carries full context so the offending query is reconstructible from
    /// the error alone.
    #[error("child index {index} out of range for node {node} ({available} available)")]
    ChildIndex {
        node: NodeId,
        index: usize,
        available: usize,
    },

    /// The store client failed a query.
    #[error("graph store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TaintGraphError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_index_error_carries_context() {
        let err = TaintGraphError::ChildIndex {
            node: 42,
            index: 3,
            available: 2,
        };
        let msg = err.to_string();
        assert!(msg.contains("42"));
        assert!(msg.contains("index 3"));
        assert!(msg.contains("2 available"));
    }

    #[test]
    fn store_error_converts() {
        fn fails() -> Result<()> {
            Err(rusqlite::Error::QueryReturnedNoRows)?;
            Ok(())
        }
        assert!(matches!(fails(), Err(TaintGraphError::Store(_))));
    }
}
