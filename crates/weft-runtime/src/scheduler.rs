//! Reconciliation scheduling.
//!
//! Explicit passes (ticks, `render`) always run. A tracked mutation made
//! while idle queues one implicit follow-up, picked up by the session's
//! background worker, so a synchronous burst of writes coalesces into a
//! single pass. Mutations made during a pass only set a pending flag and
//! produce exactly one follow-up after the pass ends.

use std::fmt;
use std::pin::pin;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::errors::RuntimeError;

/// What started a pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// A tick or `render` call.
    Explicit,
    /// A tracked mutation.
    Implicit,
}

/// Emitted at the start of every pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileEvent {
    /// What started the pass.
    pub trigger: Trigger,
    /// Human-readable reason.
    pub reason: String,
    /// Pass number within the session, starting at 1.
    pub pass: u64,
}

/// Observable scheduler state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    /// No pass running.
    Idle,
    /// A pass is running.
    Evaluating,
    /// A pass is running and a follow-up has been requested.
    EvaluatingRescheduled,
}

/// A claimed follow-up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Claim {
    /// Reason recorded when the follow-up was queued.
    pub reason: String,
    epoch: u64,
}

#[derive(Debug, Default)]
struct State {
    evaluating: bool,
    reschedule: Option<String>,
    queued: Option<String>,
    claimed: bool,
    closed: bool,
    passes: u64,
    explicit_epoch: u64,
    busy: u32,
}

/// Returned by [`Scheduler::busy`]. Dropping it may make the scheduler idle.
#[derive(Debug)]
pub struct BusyGuard<'a> {
    scheduler: &'a Scheduler,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.state.lock().busy -= 1;
        self.scheduler.idle.notify_waiters();
    }
}

type ReconcileListener = Box<dyn Fn(&ReconcileEvent) + Send + Sync>;

/// Per-session pass scheduler.
pub struct Scheduler {
    state: Mutex<State>,
    wake: Notify,
    idle: Notify,
    cancel: CancellationToken,
    listener: RwLock<Option<ReconcileListener>>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Idle scheduler.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            wake: Notify::new(),
            idle: Notify::new(),
            cancel: CancellationToken::new(),
            listener: RwLock::new(None),
        }
    }

    /// Install the reconcile-event listener.
    pub fn set_listener(&self, f: impl Fn(&ReconcileEvent) + Send + Sync + 'static) {
        *self.listener.write() = Some(Box::new(f));
    }

    /// Current state.
    pub fn state(&self) -> SchedulerState {
        let s = self.state.lock();
        match (s.evaluating, s.reschedule.is_some()) {
            (false, _) => SchedulerState::Idle,
            (true, false) => SchedulerState::Evaluating,
            (true, true) => SchedulerState::EvaluatingRescheduled,
        }
    }

    /// Token cancelled by [`close`](Self::close).
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Passes started so far.
    pub fn pass_count(&self) -> u64 {
        self.state.lock().passes
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Whether nothing is running, awaited, queued or claimed.
    pub fn is_idle(&self) -> bool {
        let s = self.state.lock();
        !s.evaluating && s.busy == 0 && s.queued.is_none() && !s.claimed
    }

    /// A tracked value changed.
    pub fn request_implicit(&self, reason: &str) {
        let mut s = self.state.lock();
        if s.closed {
            trace!(reason, "ignoring change on closed session");
            return;
        }
        if s.evaluating {
            if s.reschedule.is_none() {
                s.reschedule = Some(reason.to_owned());
            }
            return;
        }
        if s.queued.is_some() || s.claimed {
            return;
        }
        s.queued = Some(reason.to_owned());
        drop(s);
        self.wake.notify_one();
    }

    /// Mark a pass as started and emit its reconcile event.
    pub fn begin_pass(&self, trigger: Trigger, reason: &str) -> Result<u64, RuntimeError> {
        let event = {
            let mut s = self.state.lock();
            if s.closed {
                return Err(RuntimeError::SessionClosed);
            }
            match trigger {
                Trigger::Explicit => {
                    s.queued = None;
                    s.explicit_epoch += 1;
                }
                Trigger::Implicit => s.claimed = false,
            }
            s.evaluating = true;
            s.passes += 1;
            ReconcileEvent {
                trigger,
                reason: reason.to_owned(),
                pass: s.passes,
            }
        };
        debug!(pass = event.pass, trigger = ?event.trigger, reason = %event.reason, "reconcile");
        if let Some(listener) = self.listener.read().as_ref() {
            listener(&event);
        }
        Ok(event.pass)
    }

    /// Mark the running pass as finished, queuing its follow-up if one was
    /// requested.
    pub fn end_pass(&self) {
        let mut s = self.state.lock();
        s.evaluating = false;
        let Some(reason) = s.reschedule.take() else {
            drop(s);
            self.idle.notify_waiters();
            return;
        };
        if s.closed || s.queued.is_some() {
            drop(s);
            self.idle.notify_waiters();
            return;
        }
        s.queued = Some(reason);
        drop(s);
        self.wake.notify_one();
    }

    /// Take the queued follow-up, if any.
    pub fn claim(&self) -> Option<Claim> {
        let mut s = self.state.lock();
        if s.closed {
            return None;
        }
        let reason = s.queued.take()?;
        s.claimed = true;
        Some(Claim {
            reason,
            epoch: s.explicit_epoch,
        })
    }

    /// Whether an explicit pass started after `claim` was taken, making it
    /// redundant.
    pub fn is_superseded(&self, claim: &Claim) -> bool {
        self.state.lock().explicit_epoch != claim.epoch
    }

    /// Release a claim whose pass was skipped. Starting an implicit pass
    /// releases it too.
    pub fn release(&self, claim: Claim) {
        trace!(reason = %claim.reason, "claim released");
        self.state.lock().claimed = false;
        self.idle.notify_waiters();
    }

    /// Hold the scheduler non-idle across a run of passes and the fetches
    /// awaited between them.
    pub fn busy(&self) -> BusyGuard<'_> {
        self.state.lock().busy += 1;
        BusyGuard { scheduler: self }
    }

    /// Wait for a follow-up. `None` once closed.
    pub async fn wait_for_work(&self) -> Option<Claim> {
        loop {
            if self.is_closed() {
                return None;
            }
            if let Some(claim) = self.claim() {
                return Some(claim);
            }
            tokio::select! {
                () = self.wake.notified() => {}
                () = self.cancel.cancelled() => return None,
            }
        }
    }

    /// Stop scheduling: drop queued work and cancel pending awaits.
    pub fn close(&self) {
        {
            let mut s = self.state.lock();
            s.closed = true;
            s.queued = None;
            s.reschedule = None;
        }
        self.cancel.cancel();
        self.wake.notify_waiters();
        self.idle.notify_waiters();
    }

    /// Wait until no pass is running, queued or claimed.
    pub async fn settle(&self) {
        loop {
            let mut idle = pin!(self.idle.notified());
            idle.as_mut().enable();
            if self.is_idle() || self.is_closed() {
                return;
            }
            idle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn burst_while_idle_queues_once() {
        let s = Scheduler::new();
        for i in 0..100 {
            s.request_implicit(&format!("write {i}"));
        }
        let claim = s.claim().unwrap();
        assert_eq!(claim.reason, "write 0");
        assert!(s.claim().is_none());
    }

    #[test]
    fn changes_during_pass_produce_one_followup() {
        let s = Scheduler::new();
        let _ = s.begin_pass(Trigger::Explicit, "tick").unwrap();
        assert_eq!(s.state(), SchedulerState::Evaluating);
        s.request_implicit("a");
        s.request_implicit("b");
        assert_eq!(s.state(), SchedulerState::EvaluatingRescheduled);
        s.end_pass();
        assert_eq!(s.claim().map(|c| c.reason), Some("a".to_owned()));
        assert!(s.claim().is_none());
    }

    #[test]
    fn explicit_pass_consumes_queue() {
        let s = Scheduler::new();
        s.request_implicit("x");
        let _ = s.begin_pass(Trigger::Explicit, "render").unwrap();
        s.end_pass();
        assert!(s.claim().is_none());
        assert!(s.is_idle());
    }

    #[test]
    fn explicit_pass_supersedes_claim() {
        let s = Scheduler::new();
        s.request_implicit("x");
        let claim = s.claim().unwrap();
        assert!(!s.is_superseded(&claim));
        let _ = s.begin_pass(Trigger::Explicit, "tick").unwrap();
        s.end_pass();
        assert!(s.is_superseded(&claim));
        assert!(!s.is_idle());
        s.release(claim);
        assert!(s.is_idle());
    }

    #[test]
    fn closed_rejects_passes_and_drops_queue() {
        let s = Scheduler::new();
        s.request_implicit("x");
        s.close();
        assert!(s.claim().is_none());
        assert_matches!(s.begin_pass(Trigger::Explicit, "tick"), Err(RuntimeError::SessionClosed));
        assert!(s.cancellation().is_cancelled());
    }

    #[test]
    fn listener_sees_each_pass() {
        let s = Scheduler::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let n = Arc::clone(&seen);
        s.set_listener(move |e| {
            let _ = n.fetch_add(1, Ordering::SeqCst);
            assert!(e.pass >= 1);
        });
        for _ in 0..3 {
            let _ = s.begin_pass(Trigger::Implicit, "change").unwrap();
            s.end_pass();
        }
        assert_eq!(seen.load(Ordering::SeqCst), 3);
        assert_eq!(s.pass_count(), 3);
    }

    #[tokio::test]
    async fn worker_wakes_on_request() {
        let s = Arc::new(Scheduler::new());
        let w = Arc::clone(&s);
        let handle = tokio::spawn(async move { w.wait_for_work().await });
        tokio::task::yield_now().await;
        s.request_implicit("later");
        let claim = handle.await.unwrap().unwrap();
        assert_eq!(claim.reason, "later");
    }

    #[tokio::test]
    async fn settle_returns_when_pass_ends() {
        let s = Arc::new(Scheduler::new());
        let _ = s.begin_pass(Trigger::Explicit, "tick").unwrap();
        let w = Arc::clone(&s);
        let handle = tokio::spawn(async move { w.settle().await });
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());
        s.end_pass();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn settle_waits_for_released_claim() {
        let s = Arc::new(Scheduler::new());
        s.request_implicit("x");
        let claim = s.claim().unwrap();
        let w = Arc::clone(&s);
        let handle = tokio::spawn(async move { w.settle().await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!handle.is_finished());
        s.release(claim);
        handle.await.unwrap();
    }

    #[test]
    fn busy_guard_spans_passes() {
        let s = Scheduler::new();
        let busy = s.busy();
        let _ = s.begin_pass(Trigger::Implicit, "change").unwrap();
        s.end_pass();
        assert!(!s.is_idle());
        drop(busy);
        assert!(s.is_idle());
    }

    #[tokio::test]
    async fn worker_stops_on_close() {
        let s = Arc::new(Scheduler::new());
        let w = Arc::clone(&s);
        let handle = tokio::spawn(async move { w.wait_for_work().await });
        tokio::task::yield_now().await;
        s.close();
        assert!(handle.await.unwrap().is_none());
    }
}
