//! Reactive runtime: node arena, tracking stack and batch state.
//!
//! ## Ownership
//!
//! Every signal, computed, effect and tracker owns one slot in the arena of
//! the runtime that created it. Edges are stored as [`NodeId`]s in both
//! directions (`sources` and `subscribers`); the arena holds only a [`Weak`]
//! handle to the node's behavior, so the graph never keeps a node alive.
//! Dropping the last handle removes the slot and unlinks its own edges.
//!
//! ## Locking
//!
//! The arena lives behind one mutex. User code (effect bodies, computed
//! functions, tracker callbacks) never runs while it is held, and upgraded
//! handles are only dropped after it is released.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::Mutex;
use tracing::trace;

use crate::computed::Computed;
use crate::effect::{Effect, IntoCleanup};
use crate::signal::Signal;
use crate::tracker::Tracker;

/// Generation-checked handle to an arena slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

/// What a node does when something upstream changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NodeKind {
    /// Writable value; never notified.
    Source,
    /// Derived value; marked stale, recomputed lazily.
    Derived,
    /// Effect or tracker; notified eagerly (or at batch exit).
    Observer,
}

/// Behavior the graph invokes on derived and observer nodes.
pub(crate) trait Subscriber: Send + Sync {
    /// Flag a derived value for recomputation on next read.
    fn mark_stale(&self) {}
    /// React to an upstream change.
    fn notify(&self) {}
}

struct Node {
    kind: NodeKind,
    subscribers: Vec<NodeId>,
    sources: Vec<NodeId>,
    handle: Option<Weak<dyn Subscriber>>,
}

struct Slot {
    generation: u32,
    node: Option<Node>,
}

#[derive(Default)]
struct Graph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
    /// `Some(id)` records reads into `id`; `None` is an untracked region.
    tracking: Vec<Option<NodeId>>,
    batch_depth: usize,
    pending: Vec<(NodeId, Weak<dyn Subscriber>)>,
    pending_ids: HashSet<NodeId>,
}

impl Graph {
    fn node(&self, id: NodeId) -> Option<&Node> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_ref()
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.node.as_mut()
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let node = Node {
            kind,
            subscribers: Vec::new(),
            sources: Vec::new(),
            handle: None,
        };
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.node = Some(node);
            NodeId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
            self.slots.push(Slot {
                generation: 0,
                node: Some(node),
            });
            NodeId {
                index,
                generation: 0,
            }
        }
    }

    /// Remove a node and every edge touching it. Returns the detached
    /// handle so the caller can drop it outside the lock.
    fn remove(&mut self, id: NodeId) -> Option<Weak<dyn Subscriber>> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let node = slot.node.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.live -= 1;

        for sub in &node.subscribers {
            if let Some(n) = self.node_mut(*sub) {
                n.sources.retain(|s| *s != id);
            }
        }
        for src in &node.sources {
            if let Some(n) = self.node_mut(*src) {
                n.subscribers.retain(|s| *s != id);
            }
        }
        let _ = self.pending_ids.remove(&id);
        node.handle
    }

    fn clear_sources(&mut self, id: NodeId) {
        let sources = match self.node_mut(id) {
            Some(n) => std::mem::take(&mut n.sources),
            None => return,
        };
        for src in sources {
            if let Some(n) = self.node_mut(src) {
                n.subscribers.retain(|s| *s != id);
            }
        }
    }

    fn link(&mut self, source: NodeId, observer: NodeId) {
        if source == observer || self.node(source).is_none() {
            return;
        }
        let Some(obs) = self.node_mut(observer) else {
            return;
        };
        if obs.sources.contains(&source) {
            return;
        }
        obs.sources.push(source);
        if let Some(src) = self.node_mut(source) {
            src.subscribers.push(observer);
        }
    }

    /// Every node reachable downstream of `id`, breadth first.
    fn downstream(&self, id: NodeId) -> Vec<(NodeId, NodeKind, Weak<dyn Subscriber>)> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut queue = std::collections::VecDeque::new();
        if let Some(n) = self.node(id) {
            queue.extend(n.subscribers.iter().copied());
        }
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next) {
                continue;
            }
            let Some(node) = self.node(next) else {
                continue;
            };
            if let Some(handle) = &node.handle {
                out.push((next, node.kind, handle.clone()));
            }
            if node.kind == NodeKind::Derived {
                queue.extend(node.subscribers.iter().copied());
            }
        }
        out
    }
}

struct RuntimeInner {
    graph: Mutex<Graph>,
}

/// An isolated reactive context.
///
/// Each runtime owns its own node arena, tracking stack and batch state, so
/// graphs built in different runtimes never observe each other. Cloning
/// yields another handle to the same runtime.
#[derive(Clone)]
pub struct ReactiveRuntime {
    inner: Arc<RuntimeInner>,
}

impl fmt::Debug for ReactiveRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveRuntime")
            .field("nodes", &self.node_count())
            .field("batching", &self.is_batching())
            .finish()
    }
}

impl Default for ReactiveRuntime {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL: OnceLock<ReactiveRuntime> = OnceLock::new();

thread_local! {
    static ENTERED: RefCell<Vec<ReactiveRuntime>> = const { RefCell::new(Vec::new()) };
}

struct EnterGuard;

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let _ = ENTERED.with(|stack| stack.borrow_mut().pop());
    }
}

impl ReactiveRuntime {
    /// Create a fresh, empty runtime.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                graph: Mutex::new(Graph::default()),
            }),
        }
    }

    /// The process-wide default runtime.
    pub fn global() -> Self {
        GLOBAL.get_or_init(Self::new).clone()
    }

    /// The innermost runtime entered on this thread, else [`global`](Self::global).
    pub fn current() -> Self {
        ENTERED
            .with(|stack| stack.borrow().last().cloned())
            .unwrap_or_else(Self::global)
    }

    /// Run `f` with this runtime as [`current`](Self::current).
    pub fn enter<R>(&self, f: impl FnOnce() -> R) -> R {
        ENTERED.with(|stack| stack.borrow_mut().push(self.clone()));
        let _guard = EnterGuard;
        f()
    }

    /// Whether two handles point at the same runtime.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.inner.graph.lock().live
    }

    /// Whether a batch is open.
    pub fn is_batching(&self) -> bool {
        self.inner.graph.lock().batch_depth > 0
    }

    /// Create a signal bound to this runtime.
    pub fn signal<T: Send + Sync + 'static>(&self, initial: T) -> Signal<T> {
        Signal::new_in(self, initial)
    }

    /// Create a lazily computed value bound to this runtime.
    pub fn computed<T, F>(&self, f: F) -> Computed<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Computed::new_in(self, f)
    }

    /// Create and immediately run an effect bound to this runtime.
    pub fn effect<R, F>(&self, f: F) -> Effect
    where
        R: IntoCleanup,
        F: FnMut() -> R + Send + 'static,
    {
        Effect::new_in(self, f)
    }

    /// Create a tracker whose `on_change` fires when anything it tracked changes.
    pub fn tracker<F>(&self, on_change: F) -> Tracker
    where
        F: Fn() + Send + Sync + 'static,
    {
        Tracker::new_in(self, on_change)
    }

    /// Defer observer notifications until the outermost batch exits.
    ///
    /// Derived values are still marked stale immediately, so reads inside
    /// the batch see fresh values.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.graph.lock().batch_depth += 1;
        let guard = BatchGuard { rt: self };
        let out = f();
        drop(guard);
        out
    }

    /// Run `f` without recording reads as dependencies.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.graph.lock().tracking.push(None);
        let _guard = TrackingGuard { rt: self };
        f()
    }

    // ── crate-internal graph operations ─────────────────────────────────

    pub(crate) fn alloc(&self, kind: NodeKind) -> NodeId {
        self.inner.graph.lock().alloc(kind)
    }

    pub(crate) fn set_handle(&self, id: NodeId, handle: Weak<dyn Subscriber>) {
        if let Some(node) = self.inner.graph.lock().node_mut(id) {
            node.handle = Some(handle);
        }
    }

    pub(crate) fn remove(&self, id: NodeId) {
        let handle = self.inner.graph.lock().remove(id);
        drop(handle);
    }

    pub(crate) fn contains(&self, id: NodeId) -> bool {
        self.inner.graph.lock().node(id).is_some()
    }

    pub(crate) fn subscriber_count(&self, id: NodeId) -> usize {
        self.inner
            .graph
            .lock()
            .node(id)
            .map_or(0, |n| n.subscribers.len())
    }

    pub(crate) fn source_count(&self, id: NodeId) -> usize {
        self.inner
            .graph
            .lock()
            .node(id)
            .map_or(0, |n| n.sources.len())
    }

    /// Record a read of `id` into the innermost tracking scope.
    pub(crate) fn track_read(&self, id: NodeId) {
        let mut graph = self.inner.graph.lock();
        if let Some(Some(observer)) = graph.tracking.last().copied() {
            graph.link(id, observer);
        }
    }

    /// Run `f` as `observer`, replacing its previous sources with whatever
    /// `f` reads.
    pub(crate) fn run_tracked<R>(&self, observer: NodeId, f: impl FnOnce() -> R) -> R {
        {
            let mut graph = self.inner.graph.lock();
            graph.clear_sources(observer);
            graph.tracking.push(Some(observer));
        }
        let _guard = TrackingGuard { rt: self };
        f()
    }

    /// Propagate a change of `id` downstream.
    pub(crate) fn propagate(&self, id: NodeId) {
        let (reached, batching) = {
            let graph = self.inner.graph.lock();
            (graph.downstream(id), graph.batch_depth > 0)
        };
        if reached.is_empty() {
            return;
        }
        trace!(node = %id, reached = reached.len(), batching, "propagating change");

        let mut observers = Vec::new();
        for (node_id, kind, weak) in reached {
            match kind {
                NodeKind::Derived => {
                    if let Some(sub) = weak.upgrade() {
                        sub.mark_stale();
                    }
                }
                NodeKind::Observer => observers.push((node_id, weak)),
                NodeKind::Source => {}
            }
        }

        if batching {
            let mut graph = self.inner.graph.lock();
            // The batch may have closed between the two lock scopes.
            if graph.batch_depth > 0 {
                for (node_id, weak) in observers {
                    if graph.pending_ids.insert(node_id) {
                        graph.pending.push((node_id, weak));
                    }
                }
                return;
            }
        }
        notify_all(observers);
    }

    fn end_batch(&self) {
        let flushed = {
            let mut graph = self.inner.graph.lock();
            graph.batch_depth = graph.batch_depth.saturating_sub(1);
            if graph.batch_depth > 0 {
                return;
            }
            graph.pending_ids.clear();
            std::mem::take(&mut graph.pending)
        };
        if !flushed.is_empty() {
            trace!(observers = flushed.len(), "flushing batch");
        }
        notify_all(flushed);
    }
}

fn notify_all(observers: Vec<(NodeId, Weak<dyn Subscriber>)>) {
    for (_, weak) in observers {
        if let Some(sub) = weak.upgrade() {
            sub.notify();
        }
    }
}

struct TrackingGuard<'a> {
    rt: &'a ReactiveRuntime,
}

impl Drop for TrackingGuard<'_> {
    fn drop(&mut self) {
        let _ = self.rt.inner.graph.lock().tracking.pop();
    }
}

struct BatchGuard<'a> {
    rt: &'a ReactiveRuntime,
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        self.rt.end_batch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_reuses_slots_with_new_generation() {
        let rt = ReactiveRuntime::new();
        let a = rt.alloc(NodeKind::Source);
        rt.remove(a);
        let b = rt.alloc(NodeKind::Source);
        assert_eq!(a.index, b.index);
        assert_ne!(a.generation, b.generation);
        assert!(!rt.contains(a));
        assert!(rt.contains(b));
    }

    #[test]
    fn link_is_idempotent() {
        let rt = ReactiveRuntime::new();
        let src = rt.alloc(NodeKind::Source);
        let obs = rt.alloc(NodeKind::Observer);
        rt.run_tracked(obs, || {
            rt.track_read(src);
            rt.track_read(src);
        });
        assert_eq!(rt.subscriber_count(src), 1);
        assert_eq!(rt.source_count(obs), 1);
    }

    #[test]
    fn untracked_reads_do_not_link() {
        let rt = ReactiveRuntime::new();
        let src = rt.alloc(NodeKind::Source);
        let obs = rt.alloc(NodeKind::Observer);
        rt.run_tracked(obs, || rt.untracked(|| rt.track_read(src)));
        assert_eq!(rt.subscriber_count(src), 0);
    }

    #[test]
    fn remove_unlinks_both_directions() {
        let rt = ReactiveRuntime::new();
        let src = rt.alloc(NodeKind::Source);
        let obs = rt.alloc(NodeKind::Observer);
        rt.run_tracked(obs, || rt.track_read(src));
        rt.remove(obs);
        assert_eq!(rt.subscriber_count(src), 0);
        assert_eq!(rt.node_count(), 1);
    }

    #[test]
    fn enter_sets_current() {
        let rt = ReactiveRuntime::new();
        assert!(!ReactiveRuntime::current().ptr_eq(&rt));
        rt.enter(|| assert!(ReactiveRuntime::current().ptr_eq(&rt)));
        assert!(ReactiveRuntime::current().ptr_eq(&ReactiveRuntime::global()));
    }

    #[test]
    fn nested_batches_close_once() {
        let rt = ReactiveRuntime::new();
        rt.batch(|| {
            rt.batch(|| assert!(rt.is_batching()));
            assert!(rt.is_batching());
        });
        assert!(!rt.is_batching());
    }
}
