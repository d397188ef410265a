//! Lazily derived values.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use tracing::warn;

use crate::errors::{ReactiveError, Result};
use crate::runtime::{NodeId, NodeKind, ReactiveRuntime, Subscriber};

struct ComputedInner<T> {
    rt: ReactiveRuntime,
    id: NodeId,
    f: Box<dyn Fn() -> T + Send + Sync>,
    value: RwLock<Option<T>>,
    dirty: AtomicBool,
    computing: AtomicBool,
    cycle: AtomicBool,
}

impl<T: Send + Sync> Subscriber for ComputedInner<T> {
    fn mark_stale(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

impl<T> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        self.rt.remove(self.id);
    }
}

/// A derived value recomputed on the first read after any dependency changes.
///
/// Recomputation runs in a tracking scope owned by this node: the previous
/// dependency set is dropped and rebuilt from whatever the function reads.
pub struct Computed<T> {
    inner: Arc<ComputedInner<T>>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Computed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("id", &self.inner.id)
            .field("dirty", &self.inner.dirty.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<T: Clone + Send + Sync + 'static> Computed<T> {
    pub(crate) fn new_in<F>(rt: &ReactiveRuntime, f: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let id = rt.alloc(NodeKind::Derived);
        let inner = Arc::new(ComputedInner {
            rt: rt.clone(),
            id,
            f: Box::new(f),
            value: RwLock::new(None),
            dirty: AtomicBool::new(true),
            computing: AtomicBool::new(false),
            cycle: AtomicBool::new(false),
        });
        let weak: Weak<dyn Subscriber> = Arc::downgrade(&inner) as Weak<dyn Subscriber>;
        rt.set_handle(id, weak);
        Self { inner }
    }

    /// Arena id of this computed value.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Read the value, recomputing if stale.
    ///
    /// Fails with [`ReactiveError::CircularDependency`] when read from inside
    /// its own recomputation, and for the outer read that started it.
    pub fn try_get(&self) -> Result<T> {
        let inner = &self.inner;
        if inner.computing.load(Ordering::Acquire) {
            inner.cycle.store(true, Ordering::Release);
            return Err(ReactiveError::CircularDependency { node: inner.id });
        }
        inner.rt.track_read(inner.id);

        if inner.dirty.swap(false, Ordering::AcqRel) || inner.value.read().is_none() {
            inner.cycle.store(false, Ordering::Release);
            inner.computing.store(true, Ordering::Release);
            let _guard = ComputingGuard(&inner.computing);
            let next = inner.rt.run_tracked(inner.id, || (inner.f)());
            if inner.cycle.swap(false, Ordering::AcqRel) {
                inner.dirty.store(true, Ordering::Release);
                warn!(node = %inner.id, "computed value read itself during recomputation");
                return Err(ReactiveError::CircularDependency { node: inner.id });
            }
            *inner.value.write() = Some(next.clone());
            return Ok(next);
        }

        inner
            .value
            .read()
            .clone()
            .ok_or(ReactiveError::CircularDependency { node: inner.id })
    }

    /// Read the value, recomputing if stale.
    ///
    /// # Panics
    ///
    /// Panics on a circular dependency; use [`try_get`](Self::try_get) where
    /// the function may read itself.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(v) => v,
            Err(e) => panic!("{e}"),
        }
    }

    /// Whether the next read will recompute.
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::Acquire)
    }

    /// Number of nodes this value currently depends on.
    pub fn source_count(&self) -> usize {
        self.inner.rt.source_count(self.inner.id)
    }

    /// Number of computations currently subscribed to this value.
    pub fn subscriber_count(&self) -> usize {
        self.inner.rt.subscriber_count(self.inner.id)
    }

    /// Detach from the graph. Later reads recompute untracked each time.
    pub fn dispose(&self) {
        self.inner.rt.remove(self.inner.id);
        self.inner.dirty.store(true, Ordering::Release);
    }
}

struct ComputingGuard<'a>(&'a AtomicBool);

impl Drop for ComputingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
