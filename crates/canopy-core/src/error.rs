//! Centralized error types for canopy.

use thiserror::Error;

/// Which traversal budget was exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalLimit {
    Hops,
    VisitedNodes,
}

impl std::fmt::Display for TraversalLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TraversalLimit::Hops => write!(f, "hop"),
            TraversalLimit::VisitedNodes => write!(f, "visited-node"),
        }
    }
}

/// Main error type for canopy operations.
#[derive(Error, Debug)]
pub enum CanopyError {
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Edge not found: {0}")]
    EdgeNotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Traversal exceeded the {kind} limit of {limit}")]
    TraversalBudgetExceeded { kind: TraversalLimit, limit: usize },

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Database error: {0}")]
    Database(#[from] canopy_db::DbError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for canopy operations.
pub type CanopyResult<T> = Result<T, CanopyError>;

impl CanopyError {
    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ValidationError(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// True when a caller hit a resource bound rather than the end of the graph.
    pub fn is_budget_exceeded(&self) -> bool {
        matches!(self, Self::TraversalBudgetExceeded { .. })
    }
}
