//! Reactive graph errors.

use crate::runtime::NodeId;

/// Errors raised by the reactive graph.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReactiveError {
    /// A computed value read itself while recomputing.
    #[error("circular dependency: computed {node} read itself during recomputation")]
    CircularDependency {
        /// The computed node involved.
        node: NodeId,
    },
}

impl ReactiveError {
    /// Error category string for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::CircularDependency { .. } => "circular_dependency",
        }
    }

    /// Graph errors are programming mistakes and never retried.
    pub fn is_recoverable(&self) -> bool {
        false
    }
}

/// Result type for reactive operations.
pub type Result<T> = std::result::Result<T, ReactiveError>;
