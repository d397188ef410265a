//! Eager side effects with cleanup.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::warn;

use crate::runtime::{NodeId, NodeKind, ReactiveRuntime, Subscriber};

/// Upper bound on back-to-back re-runs triggered by an effect writing its
/// own dependencies.
pub const MAX_EFFECT_RERUNS: u32 = 100;

/// A cleanup function returned by an effect body.
pub struct Cleanup(Box<dyn FnOnce() + Send>);

impl Cleanup {
    /// Wrap a cleanup closure.
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Box::new(f))
    }

    /// Run the cleanup.
    pub fn run(self) {
        (self.0)();
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cleanup")
    }
}

/// Values an effect body may return.
pub trait IntoCleanup {
    /// Convert into an optional cleanup.
    fn into_cleanup(self) -> Option<Cleanup>;
}

impl IntoCleanup for () {
    fn into_cleanup(self) -> Option<Cleanup> {
        None
    }
}

impl IntoCleanup for Cleanup {
    fn into_cleanup(self) -> Option<Cleanup> {
        Some(self)
    }
}

impl IntoCleanup for Option<Cleanup> {
    fn into_cleanup(self) -> Option<Cleanup> {
        self
    }
}

struct EffectInner {
    rt: ReactiveRuntime,
    id: NodeId,
    body: Mutex<Box<dyn FnMut() -> Option<Cleanup> + Send>>,
    cleanup: Mutex<Option<Cleanup>>,
    running: AtomicBool,
    rerun: AtomicBool,
    disposed: AtomicBool,
    runs: AtomicU64,
}

impl EffectInner {
    fn run(&self) {
        if self.disposed.load(Ordering::Acquire) {
            return;
        }
        if self.running.swap(true, Ordering::AcqRel) {
            self.rerun.store(true, Ordering::Release);
            return;
        }

        let mut reruns = 0u32;
        loop {
            self.rerun.store(false, Ordering::Release);
            self.run_cleanup();
            let next = {
                let mut body = self.body.lock();
                self.rt.run_tracked(self.id, || body())
            };
            *self.cleanup.lock() = next;
            let _ = self.runs.fetch_add(1, Ordering::Relaxed);

            if !self.rerun.load(Ordering::Acquire) || self.disposed.load(Ordering::Acquire) {
                break;
            }
            reruns += 1;
            if reruns >= MAX_EFFECT_RERUNS {
                warn!(node = %self.id, reruns, "effect keeps retriggering itself, stopping");
                break;
            }
        }
        self.running.store(false, Ordering::Release);
    }

    fn run_cleanup(&self) {
        let cleanup = self.cleanup.lock().take();
        if let Some(cleanup) = cleanup {
            self.rt.untracked(|| cleanup.run());
        }
    }

    fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.rt.remove(self.id);
        self.run_cleanup();
    }
}

impl Subscriber for EffectInner {
    fn notify(&self) {
        self.run();
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// A side effect that runs on creation and again whenever anything it read
/// changes.
///
/// The effect stops when its last handle is dropped or
/// [`dispose`](Self::dispose) is called; its pending cleanup runs then.
#[must_use = "an effect stops when its handle is dropped"]
#[derive(Clone)]
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.inner.id)
            .field("runs", &self.run_count())
            .finish()
    }
}

impl Effect {
    pub(crate) fn new_in<R, F>(rt: &ReactiveRuntime, mut f: F) -> Self
    where
        R: IntoCleanup,
        F: FnMut() -> R + Send + 'static,
    {
        let id = rt.alloc(NodeKind::Observer);
        let inner = Arc::new(EffectInner {
            rt: rt.clone(),
            id,
            body: Mutex::new(Box::new(move || f().into_cleanup())),
            cleanup: Mutex::new(None),
            running: AtomicBool::new(false),
            rerun: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            runs: AtomicU64::new(0),
        });
        rt.set_handle(id, Arc::downgrade(&inner) as std::sync::Weak<dyn Subscriber>);
        inner.run();
        Self { inner }
    }

    /// Arena id of this effect.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// How many times the body has run.
    pub fn run_count(&self) -> u64 {
        self.inner.runs.load(Ordering::Relaxed)
    }

    /// Number of nodes this effect currently depends on.
    pub fn source_count(&self) -> usize {
        self.inner.rt.source_count(self.inner.id)
    }

    /// Stop the effect and run its pending cleanup.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Whether the effect has been stopped.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn runs_eagerly_and_on_change() {
        let rt = ReactiveRuntime::new();
        let s = rt.signal(0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let e = {
            let (s, seen) = (s.clone(), Arc::clone(&seen));
            rt.effect(move || seen.lock().push(s.get()))
        };
        s.set(1);
        s.set(2);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        assert_eq!(e.run_count(), 3);
    }

    #[test]
    fn cleanup_runs_before_rerun_and_on_dispose() {
        let rt = ReactiveRuntime::new();
        let s = rt.signal(0);
        let cleanups = Arc::new(AtomicUsize::new(0));
        let e = {
            let (s, cleanups) = (s.clone(), Arc::clone(&cleanups));
            rt.effect(move || {
                let _ = s.get();
                let cleanups = Arc::clone(&cleanups);
                Cleanup::new(move || {
                    let _ = cleanups.fetch_add(1, Ordering::SeqCst);
                })
            })
        };
        assert_eq!(cleanups.load(Ordering::SeqCst), 0);
        s.set(1);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        e.dispose();
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);
        s.set(2);
        assert_eq!(e.run_count(), 2);
    }

    #[test]
    fn dropping_handle_stops_effect() {
        let rt = ReactiveRuntime::new();
        let s = rt.signal(0);
        let runs = Arc::new(AtomicUsize::new(0));
        let e = {
            let (s, runs) = (s.clone(), Arc::clone(&runs));
            rt.effect(move || {
                let _ = s.get();
                let _ = runs.fetch_add(1, Ordering::SeqCst);
            })
        };
        drop(e);
        s.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(s.subscriber_count(), 0);
    }

    #[test]
    fn self_triggering_effect_is_bounded() {
        let rt = ReactiveRuntime::new();
        let s = rt.signal(0u32);
        let e = {
            let s = s.clone();
            rt.effect(move || {
                let v = s.get();
                s.set(v + 1);
            })
        };
        assert!(e.run_count() <= u64::from(MAX_EFFECT_RERUNS));
        assert!(s.get_untracked() >= 1);
    }
}
