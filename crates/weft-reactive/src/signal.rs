//! Writable reactive cells.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::runtime::{NodeId, NodeKind, ReactiveRuntime};

struct SignalInner<T> {
    rt: ReactiveRuntime,
    id: NodeId,
    value: RwLock<T>,
    disposed: AtomicBool,
}

impl<T> Drop for SignalInner<T> {
    fn drop(&mut self) {
        self.rt.remove(self.id);
    }
}

/// A writable value cell that records reads in the enclosing tracking scope.
///
/// Cloning a signal yields another handle to the same cell. The node is
/// removed from its runtime when the last handle is dropped.
pub struct Signal<T> {
    inner: Arc<SignalInner<T>>,
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("value", &*self.inner.value.read())
            .finish()
    }
}

impl<T: Send + Sync + 'static> Signal<T> {
    pub(crate) fn new_in(rt: &ReactiveRuntime, initial: T) -> Self {
        let id = rt.alloc(NodeKind::Source);
        Self {
            inner: Arc::new(SignalInner {
                rt: rt.clone(),
                id,
                value: RwLock::new(initial),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Arena id of this signal.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Runtime this signal belongs to.
    pub fn runtime(&self) -> &ReactiveRuntime {
        &self.inner.rt
    }

    /// Borrow the value, recording the read.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.inner.value.read())
    }

    /// Borrow the value without recording the read.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.read())
    }

    /// Replace the value and notify dependents.
    pub fn set(&self, value: T) {
        *self.inner.value.write() = value;
        self.notify();
    }

    /// Mutate the value in place and notify dependents.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        f(&mut self.inner.value.write());
        self.notify();
    }

    /// Detach from the graph.
    ///
    /// The last value stays readable, but reads no longer track and writes
    /// no longer notify.
    pub fn dispose(&self) {
        if !self.inner.disposed.swap(true, Ordering::AcqRel) {
            self.inner.rt.remove(self.inner.id);
        }
    }

    /// Whether [`dispose`](Self::dispose) has been called.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    /// Number of computations currently subscribed to this signal.
    pub fn subscriber_count(&self) -> usize {
        self.inner.rt.subscriber_count(self.inner.id)
    }

    /// Whether two handles point at the same cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn track(&self) {
        if !self.is_disposed() {
            self.inner.rt.track_read(self.inner.id);
        }
    }

    fn notify(&self) {
        if !self.is_disposed() {
            self.inner.rt.propagate(self.inner.id);
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Signal<T> {
    /// Read the value, recording the read.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Read the value without recording the read.
    pub fn get_untracked(&self) -> T {
        self.with_untracked(T::clone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_update() {
        let rt = ReactiveRuntime::new();
        let s = rt.signal(1);
        assert_eq!(s.get(), 1);
        s.set(2);
        assert_eq!(s.get_untracked(), 2);
        s.update(|v| *v += 3);
        assert_eq!(s.get(), 5);
    }

    #[test]
    fn clones_share_the_cell() {
        let rt = ReactiveRuntime::new();
        let a = rt.signal(String::from("a"));
        let b = a.clone();
        b.set("b".into());
        assert_eq!(a.get(), "b");
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn dropping_last_handle_frees_node() {
        let rt = ReactiveRuntime::new();
        let s = rt.signal(0u8);
        assert_eq!(rt.node_count(), 1);
        drop(s);
        assert_eq!(rt.node_count(), 0);
    }

    #[test]
    fn disposed_signal_keeps_last_value() {
        let rt = ReactiveRuntime::new();
        let s = rt.signal(7);
        s.dispose();
        assert!(s.is_disposed());
        assert_eq!(s.get(), 7);
        s.set(8);
        assert_eq!(s.get(), 8);
        assert_eq!(rt.node_count(), 0);
    }
}
