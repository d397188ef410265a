//! Persistent tree nodes and their hook slots.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use weft_reactive::Cleanup;

use crate::tree::element::{Key, NodeType};

/// Identity of a mounted node within one evaluator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeNodeId(pub(crate) u64);

impl fmt::Display for TreeNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Tag of a hook slot. The sequence of kinds a node produces must be
/// identical on every evaluation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookKind {
    /// `use_state`.
    State,
    /// `use_effect`.
    Effect,
    /// `use_memo`.
    Memo,
    /// `use_callback`.
    Callback,
    /// `use_ref`.
    Ref,
    /// `use_context`.
    Context,
    /// `use_custom` and the hooks built on it.
    Custom,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::State => "state",
            Self::Effect => "effect",
            Self::Memo => "memo",
            Self::Callback => "callback",
            Self::Ref => "ref",
            Self::Context => "context",
            Self::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// Shared cell holding an effect's pending cleanup.
pub(crate) type CleanupCell = Arc<Mutex<Option<Cleanup>>>;

/// Action run when the owning node unmounts.
pub(crate) type UnmountAction = Arc<dyn Fn() + Send + Sync>;

/// One unit of per-node local state.
#[derive(Clone)]
pub(crate) enum HookSlot {
    State(Arc<dyn Any + Send + Sync>),
    Effect {
        deps: Option<Vec<Value>>,
        cleanup: CleanupCell,
    },
    Memo {
        deps: Vec<Value>,
        value: Arc<dyn Any + Send + Sync>,
    },
    Callback(Arc<dyn Any + Send + Sync>),
    Ref(Arc<dyn Any + Send + Sync>),
    Context(TypeId),
    Custom {
        value: Arc<dyn Any + Send + Sync>,
        on_unmount: Option<UnmountAction>,
    },
}

impl HookSlot {
    pub(crate) fn kind(&self) -> HookKind {
        match self {
            Self::State(_) => HookKind::State,
            Self::Effect { .. } => HookKind::Effect,
            Self::Memo { .. } => HookKind::Memo,
            Self::Callback(_) => HookKind::Callback,
            Self::Ref(_) => HookKind::Ref,
            Self::Context(_) => HookKind::Context,
            Self::Custom { .. } => HookKind::Custom,
        }
    }

    /// Run whatever teardown this slot owns.
    pub(crate) fn teardown(&self) {
        match self {
            Self::Effect { cleanup, .. } => {
                let pending = cleanup.lock().take();
                if let Some(cleanup) = pending {
                    cleanup.run();
                }
            }
            Self::Custom {
                on_unmount: Some(action),
                ..
            } => action(),
            _ => {}
        }
    }
}

impl fmt::Debug for HookSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HookSlot::{}", self.kind())
    }
}

/// A mounted node.
#[derive(Clone, Debug)]
pub(crate) struct Node {
    pub(crate) node_type: NodeType,
    pub(crate) key: Key,
    pub(crate) name: &'static str,
    pub(crate) slots: Vec<HookSlot>,
    pub(crate) children: Vec<TreeNodeId>,
}

impl Node {
    pub(crate) fn teardown(&self) {
        for slot in &self.slots {
            slot.teardown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn effect_teardown_runs_once() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let slot = HookSlot::Effect {
            deps: None,
            cleanup: Arc::new(Mutex::new(Some(Cleanup::new(move || {
                let _ = h.fetch_add(1, Ordering::SeqCst);
            })))),
        };
        slot.teardown();
        slot.teardown();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn kinds_display_lowercase() {
        assert_eq!(HookKind::Callback.to_string(), "callback");
        assert_eq!(HookSlot::Context(TypeId::of::<u8>()).kind(), HookKind::Context);
    }
}
