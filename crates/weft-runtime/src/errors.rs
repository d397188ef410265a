//! Runtime error types.

use crate::model::ModelError;
use crate::tree::HookKind;

/// Misuse of the hook or tree API. Always fatal, never retried.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ProgrammingError {
    /// A node called a different hook at a slot than on its previous evaluation.
    #[error("hook order changed in <{component}>: slot {slot} was {expected}, now {found}")]
    HookKindMismatch {
        /// Component name.
        component: String,
        /// Slot index.
        slot: usize,
        /// Kind recorded on the previous evaluation.
        expected: HookKind,
        /// Kind requested now.
        found: HookKind,
    },

    /// A node called fewer or more hooks than on its previous evaluation.
    #[error("hook count changed in <{component}>: expected {expected}, called {found}")]
    HookCountMismatch {
        /// Component name.
        component: String,
        /// Count recorded on the previous evaluation.
        expected: usize,
        /// Count called now.
        found: usize,
    },

    /// A slot holds a value of a different type than requested.
    #[error("hook value type changed in <{component}>: slot {slot} is not {expected}")]
    HookTypeMismatch {
        /// Component name.
        component: String,
        /// Slot index.
        slot: usize,
        /// Requested type name.
        expected: &'static str,
    },

    /// An evaluation-only operation was called between passes.
    #[error("{operation} called outside an evaluation pass")]
    OutsideEvaluation {
        /// Operation name.
        operation: &'static str,
    },

    /// A derived value read itself during recomputation.
    #[error("circular dependency: {0}")]
    CircularDependency(String),

    /// Two siblings of the same kind share an explicit key.
    #[error("duplicate key {key:?} among siblings of kind {sibling}")]
    DuplicateKey {
        /// The repeated key.
        key: String,
        /// Component name, or host kind for non-component siblings.
        sibling: String,
    },

    /// Two controls registered under one name.
    #[error("duplicate control name: {0}")]
    DuplicateControl(String),
}

impl From<weft_reactive::ReactiveError> for ProgrammingError {
    fn from(e: weft_reactive::ReactiveError) -> Self {
        Self::CircularDependency(e.to_string())
    }
}

/// Early exit from a component or hook.
///
/// Suspension is ordinary control flow: the evaluator discards the pass and
/// retries after the awaited data arrives. The other variants abort the pass.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum Interrupt {
    /// Waiting on an async-data key.
    #[error("suspended on {key}")]
    Suspended {
        /// The async-data key awaited.
        key: String,
    },

    /// A programming error.
    #[error(transparent)]
    Fatal(#[from] ProgrammingError),

    /// A component reported a failure.
    #[error("component failed: {0}")]
    Failed(String),
}

impl Interrupt {
    /// Component failure from any displayable error.
    pub fn failed(e: impl std::fmt::Display) -> Self {
        Self::Failed(e.to_string())
    }

    /// Whether this is a suspension.
    pub fn is_suspended(&self) -> bool {
        matches!(self, Self::Suspended { .. })
    }
}

/// Errors surfaced to callers of the session API.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// Hook or tree misuse.
    #[error("programming error: {0}")]
    Programming(#[from] ProgrammingError),

    /// A component failed during evaluation.
    #[error("evaluation failed: {0}")]
    Evaluation(String),

    /// The model adapter failed.
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// An async-data fetch timed out.
    #[error("fetch {key} failed: {message}")]
    Fetch {
        /// Async-data key.
        key: String,
        /// Failure description.
        message: String,
    },

    /// A restore resolver failed.
    #[error("failed to resolve {key}: {message}")]
    Resolve {
        /// Shared-state key being resolved.
        key: String,
        /// Resolver error.
        message: String,
    },

    /// Evaluation kept suspending.
    #[error("evaluation suspended {0} times without settling")]
    SuspensionLimit(u32),

    /// The session was closed.
    #[error("session closed")]
    SessionClosed,

    /// The operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Session id not known to the manager or store.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Store failure surfaced by a management call.
    #[error("persistence error: {0}")]
    Persistence(#[from] weft_store::StoreError),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl RuntimeError {
    /// Whether the caller can retry.
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Model(e) => e.is_recoverable(),
            Self::Persistence(e) => e.is_recoverable(),
            Self::Fetch { .. } | Self::Cancelled | Self::SuspensionLimit(_) => true,
            Self::Programming(_)
            | Self::Evaluation(_)
            | Self::Resolve { .. }
            | Self::SessionClosed
            | Self::SessionNotFound(_)
            | Self::Internal(_) => false,
        }
    }

    /// Error category string for event emission.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Programming(_) => "programming",
            Self::Evaluation(_) => "evaluation",
            Self::Model(_) => "model",
            Self::Fetch { .. } => "fetch",
            Self::Resolve { .. } => "resolve",
            Self::SuspensionLimit(_) => "suspension_limit",
            Self::SessionClosed => "session_closed",
            Self::Cancelled => "cancelled",
            Self::SessionNotFound(_) => "session_not_found",
            Self::Persistence(_) => "persistence",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<Interrupt> for RuntimeError {
    fn from(i: Interrupt) -> Self {
        match i {
            Interrupt::Fatal(e) => Self::Programming(e),
            Interrupt::Failed(m) => Self::Evaluation(m),
            Interrupt::Suspended { key } => {
                Self::Internal(format!("suspension on {key} escaped the evaluator"))
            }
        }
    }
}

/// Result type for session operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn programming_error_display() {
        let err = ProgrammingError::HookKindMismatch {
            component: "Counter".into(),
            slot: 1,
            expected: HookKind::State,
            found: HookKind::Memo,
        };
        assert_eq!(
            err.to_string(),
            "hook order changed in <Counter>: slot 1 was state, now memo"
        );
    }

    #[test]
    fn interrupt_converts_to_runtime_error() {
        let e: RuntimeError = Interrupt::Failed("boom".into()).into();
        assert_eq!(e.category(), "evaluation");
        let e: RuntimeError = Interrupt::from(ProgrammingError::OutsideEvaluation {
            operation: "use_state",
        })
        .into();
        assert_eq!(e.category(), "programming");
        assert!(!e.is_recoverable());
    }

    #[test]
    fn resolve_error_names_key() {
        let e = RuntimeError::Resolve {
            key: "profile".into(),
            message: "offline".into(),
        };
        assert_eq!(e.to_string(), "failed to resolve profile: offline");
        assert_eq!(e.category(), "resolve");
    }

    #[test]
    fn recoverability() {
        assert!(RuntimeError::Cancelled.is_recoverable());
        assert!(RuntimeError::SuspensionLimit(3).is_recoverable());
        assert!(!RuntimeError::SessionClosed.is_recoverable());
    }
}
