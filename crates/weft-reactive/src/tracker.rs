//! Caller-driven tracking scopes.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use crate::runtime::{NodeId, NodeKind, ReactiveRuntime, Subscriber};

struct TrackerInner {
    rt: ReactiveRuntime,
    id: NodeId,
    on_change: Box<dyn Fn() + Send + Sync>,
    changes: AtomicU64,
}

impl Subscriber for TrackerInner {
    fn notify(&self) {
        let _ = self.changes.fetch_add(1, Ordering::Relaxed);
        (self.on_change)();
    }
}

impl Drop for TrackerInner {
    fn drop(&mut self) {
        self.rt.remove(self.id);
    }
}

/// An observer that records what a closure reads and calls back on change.
///
/// Unlike an [`Effect`](crate::Effect), a tracker never re-runs anything by
/// itself: the owner decides what a change means. Each
/// [`track`](Self::track) call replaces the recorded dependency set.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

impl fmt::Debug for Tracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracker")
            .field("id", &self.inner.id)
            .field("sources", &self.source_count())
            .finish()
    }
}

impl Tracker {
    pub(crate) fn new_in<F>(rt: &ReactiveRuntime, on_change: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = rt.alloc(NodeKind::Observer);
        let inner = Arc::new(TrackerInner {
            rt: rt.clone(),
            id,
            on_change: Box::new(on_change),
            changes: AtomicU64::new(0),
        });
        rt.set_handle(id, Arc::downgrade(&inner) as Weak<dyn Subscriber>);
        Self { inner }
    }

    /// Run `f`, recording every reactive read as a dependency of this tracker.
    pub fn track<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.rt.run_tracked(self.inner.id, f)
    }

    /// Arena id of this tracker.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Number of nodes recorded by the last [`track`](Self::track).
    pub fn source_count(&self) -> usize {
        self.inner.rt.source_count(self.inner.id)
    }

    /// How many change notifications have been delivered.
    pub fn change_count(&self) -> u64 {
        self.inner.changes.load(Ordering::Relaxed)
    }

    /// Stop receiving notifications.
    pub fn dispose(&self) {
        self.inner.rt.remove(self.inner.id);
    }
}
