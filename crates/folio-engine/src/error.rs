use crate::editing::NodeKey;

/// Errors raised by the document engine.
///
/// Invariant errors (`NodeNotFound`, `SpliceOutOfBounds`, ...) are programmer errors:
/// they abort the running transaction and are meant for top-level logging, not for
/// control flow. `TransformDidNotConverge` is reported separately so hosts can tell a
/// runaway transform apart from a broken graph.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("node {0} not found in snapshot")]
    NodeNotFound(NodeKey),

    #[error("splice on {parent} out of bounds: index {index} + delete {delete_count} > size {size}")]
    SpliceOutOfBounds {
        parent: NodeKey,
        index: usize,
        delete_count: usize,
        size: usize,
    },

    #[error("node type '{0}' is not registered with this editor")]
    UnregisteredNodeType(String),

    #[error("node {key} is a {actual}, expected {expected}")]
    InvalidNodeType {
        key: NodeKey,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("cannot insert {child} into {parent}: it would become its own ancestor")]
    CyclicInsert { parent: NodeKey, child: NodeKey },

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("document transforms did not converge after {iterations} passes")]
    TransformDidNotConverge { iterations: usize },

    #[error("render surface has no element for node {0}")]
    MissingRenderElement(NodeKey),

    #[error("serialized document: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] crate::io::IoError),

    #[error("handler failed: {0}")]
    Handler(#[from] anyhow::Error),
}

impl EngineError {
    /// True for the fatal classes that indicate a broken graph or a bug in a caller.
    pub fn is_invariant(&self) -> bool {
        matches!(
            self,
            EngineError::NodeNotFound(_)
                | EngineError::SpliceOutOfBounds { .. }
                | EngineError::UnregisteredNodeType(_)
                | EngineError::InvalidNodeType { .. }
                | EngineError::CyclicInsert { .. }
                | EngineError::InvariantViolation(_)
                | EngineError::MissingRenderElement(_)
        )
    }
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
