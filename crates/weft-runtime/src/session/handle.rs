//! Session handle.

use std::fmt;
use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use weft_core::{SessionId, TimelineEntry, UsageStats};
use weft_reactive::ReactiveRuntime;
use weft_store::SessionSnapshot;

use crate::errors::RuntimeError;
use crate::scheduler::{Scheduler, Trigger};
use crate::session::agent::AgentParts;
use crate::session::continuation::SendOutcome;
use crate::session::events::{EventBus, EventKind, ListenerId, SessionEvent};
use crate::session::tick::SessionCore;
use crate::store::{InputQueue, RuntimeStore};
use crate::tree::RenderOutput;

struct SessionInner {
    id: SessionId,
    core: Arc<Mutex<SessionCore>>,
    scheduler: Arc<Scheduler>,
    bus: Arc<EventBus>,
    queue: InputQueue,
    restored_tick: Option<u64>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.scheduler.close();
    }
}

/// A live session. Cheap to clone; every clone drives the same session.
///
/// Dropping the last handle stops the background worker but does not
/// unmount the tree; call [`close`](Self::close) for an orderly shutdown.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("scheduler", &self.inner.scheduler.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn start(parts: Arc<AgentParts>, id: SessionId) -> Self {
        let store = RuntimeStore::new(id.clone(), ReactiveRuntime::new());
        Self::with_store(parts, store, None)
    }

    fn with_store(parts: Arc<AgentParts>, store: RuntimeStore, restored_tick: Option<u64>) -> Self {
        let id = store.session_id().clone();
        let queue = store.queue().clone();
        let scheduler = Arc::new(Scheduler::new());
        let bus = Arc::new(EventBus::new());

        let events = Arc::clone(&bus);
        scheduler.set_listener(move |e| {
            events.emit(SessionEvent::Reconcile {
                trigger: e.trigger,
                reason: e.reason.clone(),
                pass: e.pass,
            });
        });

        let core = Arc::new(Mutex::new(SessionCore::new(
            parts,
            store,
            Arc::clone(&scheduler),
            Arc::clone(&bus),
        )));
        let worker = spawn_worker(Arc::clone(&scheduler), Arc::downgrade(&core));
        debug!(session_id = %id, "session started");
        Self {
            inner: Arc::new(SessionInner {
                id,
                core,
                scheduler,
                bus,
                queue,
                restored_tick,
                worker: parking_lot::Mutex::new(Some(worker)),
            }),
        }
    }

    #[instrument(skip_all, fields(session_id = %id))]
    pub(crate) async fn open(parts: Arc<AgentParts>, id: SessionId) -> Result<Self, RuntimeError> {
        let snapshot = match parts.store.load(&id).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!("no snapshot, starting fresh");
                return Ok(Self::start(parts, id));
            }
            Err(e) => {
                warn!(error = %e, "snapshot load failed, starting fresh");
                return Ok(Self::start(parts, id));
            }
        };
        if !parts.restore.allows(&snapshot) {
            info!(tick = snapshot.tick, "restore vetoed, starting fresh");
            return Ok(Self::start(parts, id));
        }

        let mut store = RuntimeStore::new(id, ReactiveRuntime::new());
        parts.restore.apply(&mut store, &snapshot)?;
        let tick = store.tick();
        info!(tick, "session restored");
        Ok(Self::with_store(parts, store, Some(tick)))
    }

    /// Session id.
    pub fn id(&self) -> &SessionId {
        &self.inner.id
    }

    /// Tick carried over from the snapshot this session was opened from,
    /// or `None` if it started fresh.
    pub fn restored_tick(&self) -> Option<u64> {
        self.inner.restored_tick
    }

    /// Whether both handles drive the same session.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Queue `input` and run ticks until the loop stops.
    #[instrument(skip_all, fields(session_id = %self.inner.id))]
    pub async fn send(&self, input: impl Into<String>) -> Result<SendOutcome, RuntimeError> {
        self.ensure_open()?;
        self.inner.queue.push(input);
        let mut core = self.inner.core.lock().await;
        self.ensure_open()?;
        core.execute().await
    }

    /// Run an explicit pass with new root props, without calling the model.
    pub async fn render(&self, props: Value) -> Result<RenderOutput, RuntimeError> {
        self.ensure_open()?;
        let mut core = self.inner.core.lock().await;
        core.root = core.parts.root.clone().with_props(props);
        core.stabilize(Trigger::Explicit, "render").await
    }

    /// Output of the last stable pass.
    pub async fn last_output(&self) -> RenderOutput {
        self.inner.core.lock().await.last_output().clone()
    }

    /// Current durable state.
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.inner.core.lock().await.store.snapshot()
    }

    /// Save a snapshot now. Failures are reported through events.
    pub async fn persist(&self) {
        self.inner.core.lock().await.persist().await;
    }

    /// Stop scheduling, cancel pending awaits and unmount the tree.
    /// Idempotent.
    #[instrument(skip_all, fields(session_id = %self.inner.id))]
    pub async fn close(&self) {
        if self.inner.scheduler.is_closed() {
            return;
        }
        self.inner.scheduler.close();
        let worker = self.inner.worker.lock().take();
        {
            let mut core = self.inner.core.lock().await;
            let SessionCore { evaluator, store, .. } = &mut *core;
            let reactive = store.reactive().clone();
            reactive.enter(|| evaluator.unmount_all(store));
        }
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            warn!(error = %e, "reconcile worker ended abnormally");
        }
        self.inner.bus.emit(SessionEvent::Closed);
        info!("session closed");
    }

    /// Whether [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.inner.scheduler.is_closed()
    }

    /// Call `f` for every event of `kind`.
    pub fn on(&self, kind: EventKind, f: impl Fn(&SessionEvent) + Send + Sync + 'static) -> ListenerId {
        self.inner.bus.on(kind, f)
    }

    /// Remove a listener.
    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.bus.off(id)
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.bus.subscribe()
    }

    /// Queue input for the next tick without running one.
    pub fn queue(&self, input: impl Into<String>) {
        self.inner.queue.push(input);
    }

    /// Inputs waiting for the next tick.
    pub fn queued_len(&self) -> usize {
        self.inner.queue.len()
    }

    /// JSON view of a shared key.
    pub async fn shared_value(&self, key: &str) -> Option<Value> {
        self.inner.core.lock().await.store.shared_json(key)
    }

    /// Write a shared key. Components reading it re-evaluate in the
    /// background.
    pub async fn set_shared(&self, key: &str, value: Value) -> Result<(), RuntimeError> {
        self.ensure_open()?;
        self.inner.core.lock().await.store.set_shared_json(key, value);
        Ok(())
    }

    /// Apply several shared writes as one change.
    pub async fn set_shared_many(&self, values: impl IntoIterator<Item = (String, Value)>) -> Result<(), RuntimeError> {
        self.ensure_open()?;
        let mut core = self.inner.core.lock().await;
        let reactive = core.store.reactive().clone();
        reactive.batch(|| {
            for (key, value) in values {
                core.store.set_shared_json(&key, value);
            }
        });
        Ok(())
    }

    /// Copy of the timeline.
    pub async fn timeline(&self) -> Vec<TimelineEntry> {
        self.inner.core.lock().await.store.timeline().to_vec()
    }

    /// Session tick counter.
    pub async fn tick(&self) -> u64 {
        self.inner.core.lock().await.store.tick()
    }

    /// Accumulated usage.
    pub async fn usage(&self) -> UsageStats {
        *self.inner.core.lock().await.store.usage()
    }

    /// Passes started so far.
    pub fn pass_count(&self) -> u64 {
        self.inner.scheduler.pass_count()
    }

    /// The session's reactive runtime.
    pub async fn reactive(&self) -> ReactiveRuntime {
        self.inner.core.lock().await.store.reactive().clone()
    }

    /// Wait until no background pass is queued or running.
    pub async fn settle(&self) {
        self.inner.scheduler.settle().await;
    }

    fn ensure_open(&self) -> Result<(), RuntimeError> {
        if self.inner.scheduler.is_closed() {
            Err(RuntimeError::SessionClosed)
        } else {
            Ok(())
        }
    }
}

fn spawn_worker(scheduler: Arc<Scheduler>, core: Weak<Mutex<SessionCore>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(claim) = scheduler.wait_for_work().await {
            let Some(strong) = core.upgrade() else {
                break;
            };
            let mut guard = strong.lock().await;
            if scheduler.is_closed() {
                break;
            }
            if scheduler.is_superseded(&claim) {
                scheduler.release(claim);
                continue;
            }
            if let Err(e) = guard.stabilize(Trigger::Implicit, &claim.reason).await {
                warn!(reason = %claim.reason, error = %e, "background pass failed");
            }
        }
        debug!("reconcile worker stopped");
    })
}
