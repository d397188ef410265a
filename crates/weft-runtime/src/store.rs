//! Per-session runtime store.
//!
//! Everything hooks read or write that outlives a single node lives here:
//! shared state, the async-data cache, pending fetches, registered controls
//! and lifecycle callbacks, the timeline and queued input. A session owns
//! exactly one store; nothing in it is shared across sessions.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use weft_core::{SessionId, TimelineEntry, UsageStats, json};
use weft_reactive::{ReactiveRuntime, Signal};
use weft_store::{CachedData, SNAPSHOT_VERSION, SessionSnapshot};

use crate::controls::Control;
use crate::errors::ProgrammingError;
use crate::hooks::journal::PassJournal;
use crate::hooks::lifecycle::{AfterFormatFn, ExecutionEndFn, TickEndFn, TickStartFn};
use crate::tree::TreeNodeId;

/// Whether an evaluation pass is running.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Between passes.
    Idle,
    /// A pass is running.
    Evaluating,
}

/// A shared-state value: the typed value plus its eager JSON encoding, or
/// bare JSON restored from a snapshot.
#[derive(Clone)]
pub enum SharedValue {
    /// Written by Rust code.
    Typed {
        /// The value.
        value: Arc<dyn Any + Send + Sync>,
        /// JSON encoding, `None` when the value is not JSON-safe.
        json: Option<Value>,
    },
    /// Restored or written as JSON.
    Json(Value),
}

impl SharedValue {
    /// Wrap a typed value, encoding it immediately.
    pub fn typed<T: Serialize + Send + Sync + 'static>(value: T) -> Self {
        let json = json::encode(&value);
        Self::Typed {
            value: Arc::new(value),
            json,
        }
    }

    /// JSON view, `None` when not JSON-safe.
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Self::Typed { json, .. } => json.clone(),
            Self::Json(v) => Some(v.clone()),
        }
    }

    /// Read as `T`, through the typed value when possible, else through JSON.
    pub fn decode<T: Clone + DeserializeOwned + 'static>(&self) -> Option<T> {
        match self {
            Self::Typed { value, json } => value
                .downcast_ref::<T>()
                .cloned()
                .or_else(|| json.as_ref().and_then(json::decode)),
            Self::Json(v) => json::decode(v),
        }
    }
}

impl fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Typed { json, .. } => f.debug_struct("Typed").field("json", json).finish(),
            Self::Json(v) => f.debug_tuple("Json").field(v).finish(),
        }
    }
}

/// One shared-state key.
#[derive(Clone, Debug)]
pub(crate) struct SharedEntry {
    pub(crate) cell: Signal<SharedValue>,
    pub(crate) persist: bool,
}

/// One async-data cache entry.
#[derive(Clone, Debug, PartialEq)]
pub struct DataEntry {
    /// Resolved value (`null` on failure).
    pub value: Value,
    /// Tick at which it was recorded.
    pub tick: u64,
    /// Dependencies it was fetched with.
    pub deps: Vec<Value>,
    /// Whether it goes into snapshots.
    pub persist: bool,
    /// Fetch failure message.
    pub error: Option<String>,
}

/// A fetch started by an async-data hook and not yet awaited.
pub(crate) struct PendingFetch {
    pub(crate) future: BoxFuture<'static, Result<Value, String>>,
    pub(crate) deps: Vec<Value>,
    pub(crate) persist: bool,
}

/// Registrations are owned by the hook slot that made them.
pub(crate) type Owner = (TreeNodeId, usize);

/// Registration-ordered entries keyed by owner. Re-registering keeps the
/// original position.
pub(crate) struct Registry<T> {
    entries: Vec<(Owner, T)>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> Registry<T> {
    pub(crate) fn upsert(&mut self, owner: Owner, value: T) {
        if let Some(slot) = self.entries.iter_mut().find(|(o, _)| *o == owner) {
            slot.1 = value;
        } else {
            self.entries.push((owner, value));
        }
    }

    pub(crate) fn remove_node(&mut self, node: TreeNodeId) {
        self.entries.retain(|((n, _), _)| *n != node);
    }

    pub(crate) fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<T: Clone> Registry<T> {
    pub(crate) fn snapshot(&self) -> Vec<T> {
        self.values().cloned().collect()
    }
}

/// Lifecycle callback sets, each in registration order.
#[derive(Default)]
pub(crate) struct LifecycleSets {
    pub(crate) tick_start: Registry<TickStartFn>,
    pub(crate) tick_end: Registry<TickEndFn>,
    pub(crate) after_format: Registry<AfterFormatFn>,
    pub(crate) execution_end: Registry<ExecutionEndFn>,
}

/// Inputs queued for the next tick. Shared with the session handle so input
/// can be queued while an execution is running.
#[derive(Clone, Debug, Default)]
pub struct InputQueue(Arc<Mutex<VecDeque<String>>>);

impl InputQueue {
    /// Append an input.
    pub fn push(&self, input: impl Into<String>) {
        self.0.lock().push_back(input.into());
    }

    /// Take every queued input.
    pub fn drain(&self) -> Vec<String> {
        self.0.lock().drain(..).collect()
    }

    /// Number of queued inputs.
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// Per-session aggregate consumed by hooks.
pub struct RuntimeStore {
    session_id: SessionId,
    reactive: ReactiveRuntime,
    phase: Phase,
    tick: u64,
    shared: HashMap<String, SharedEntry>,
    data: HashMap<String, DataEntry>,
    pending: HashMap<String, PendingFetch>,
    pub(crate) controls: Registry<Control>,
    pub(crate) lifecycle: LifecycleSets,
    timeline: Vec<TimelineEntry>,
    queued: InputQueue,
    usage: UsageStats,
    journal: PassJournal,
}

impl fmt::Debug for RuntimeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeStore")
            .field("session_id", &self.session_id)
            .field("phase", &self.phase)
            .field("tick", &self.tick)
            .field("shared", &self.shared.len())
            .field("data", &self.data.len())
            .field("pending", &self.pending.len())
            .field("timeline", &self.timeline.len())
            .finish_non_exhaustive()
    }
}

impl RuntimeStore {
    /// Empty store bound to a session and its reactive runtime.
    pub fn new(session_id: SessionId, reactive: ReactiveRuntime) -> Self {
        Self {
            session_id,
            reactive,
            phase: Phase::Idle,
            tick: 0,
            shared: HashMap::new(),
            data: HashMap::new(),
            pending: HashMap::new(),
            controls: Registry::default(),
            lifecycle: LifecycleSets::default(),
            timeline: Vec::new(),
            queued: InputQueue::default(),
            usage: UsageStats::default(),
            journal: PassJournal::default(),
        }
    }

    /// Owning session.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Reactive runtime for this session's cells.
    pub fn reactive(&self) -> &ReactiveRuntime {
        &self.reactive
    }

    // ── Phase ───────────────────────────────────────────────────────────

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub(crate) fn begin_evaluation(&mut self) {
        self.phase = Phase::Evaluating;
        self.journal.open();
    }

    /// Leave the pass, applying its deferred slot writes only if it
    /// committed.
    pub(crate) fn end_evaluation(&mut self, committed: bool) {
        self.phase = Phase::Idle;
        self.journal.close(committed);
    }

    pub(crate) fn journal(&self) -> &PassJournal {
        &self.journal
    }

    /// Fail unless a pass is running.
    pub fn require_evaluating(&self, operation: &'static str) -> Result<(), ProgrammingError> {
        if self.phase == Phase::Evaluating {
            Ok(())
        } else {
            Err(ProgrammingError::OutsideEvaluation { operation })
        }
    }

    // ── Tick / usage ────────────────────────────────────────────────────

    /// Ticks started so far.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub(crate) fn advance_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    /// Accumulated usage.
    pub fn usage(&self) -> &UsageStats {
        &self.usage
    }

    pub(crate) fn usage_mut(&mut self) -> &mut UsageStats {
        &mut self.usage
    }

    // ── Shared state ────────────────────────────────────────────────────

    pub(crate) fn shared_entry(&mut self, key: &str) -> Option<&mut SharedEntry> {
        self.shared.get_mut(key)
    }

    pub(crate) fn insert_shared(&mut self, key: &str, value: SharedValue, persist: bool) -> Signal<SharedValue> {
        let cell = self.reactive.signal(value);
        let _ = self.shared.insert(
            key.to_owned(),
            SharedEntry {
                cell: cell.clone(),
                persist,
            },
        );
        cell
    }

    /// JSON view of a shared key.
    pub fn shared_json(&self, key: &str) -> Option<Value> {
        self.shared
            .get(key)
            .and_then(|e| e.cell.with_untracked(SharedValue::to_json))
    }

    /// Write a shared key from JSON, creating it (persisted) when absent.
    pub fn set_shared_json(&mut self, key: &str, value: Value) {
        match self.shared.get(key) {
            Some(entry) => entry.cell.set(SharedValue::Json(value)),
            None => {
                let _ = self.insert_shared(key, SharedValue::Json(value), true);
            }
        }
    }

    /// Shared keys, sorted.
    pub fn shared_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.shared.keys().cloned().collect();
        keys.sort();
        keys
    }

    // ── Async data ──────────────────────────────────────────────────────

    /// Cached entry for a key.
    pub fn data(&self, key: &str) -> Option<&DataEntry> {
        self.data.get(key)
    }

    pub(crate) fn insert_data(&mut self, key: String, entry: DataEntry) {
        let _ = self.data.insert(key, entry);
    }

    /// Whether a fetch for `key` is in flight.
    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    pub(crate) fn pending_deps(&self, key: &str) -> Option<&[Value]> {
        self.pending.get(key).map(|p| p.deps.as_slice())
    }

    /// Register a started fetch. Only valid during a pass.
    pub(crate) fn register_fetch(
        &mut self,
        key: &str,
        fetch: PendingFetch,
    ) -> Result<(), ProgrammingError> {
        self.require_evaluating("register_fetch")?;
        debug!(key, "fetch registered");
        let _ = self.pending.insert(key.to_owned(), fetch);
        Ok(())
    }

    pub(crate) fn take_pending(&mut self) -> Vec<(String, PendingFetch)> {
        self.pending.drain().collect()
    }

    /// Number of fetches in flight.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    // ── Registrations ───────────────────────────────────────────────────

    pub(crate) fn remove_owner_node(&mut self, node: TreeNodeId) {
        self.controls.remove_node(node);
        self.lifecycle.tick_start.remove_node(node);
        self.lifecycle.tick_end.remove_node(node);
        self.lifecycle.after_format.remove_node(node);
        self.lifecycle.execution_end.remove_node(node);
    }

    /// Number of registered controls.
    pub fn control_count(&self) -> usize {
        self.controls.len()
    }

    // ── Timeline / input ────────────────────────────────────────────────

    /// The conversation record.
    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.timeline
    }

    pub(crate) fn push_entry(&mut self, entry: TimelineEntry) {
        self.timeline.push(entry);
    }

    /// Drop the oldest entries beyond `limit`. Returns how many were dropped.
    pub(crate) fn trim_timeline(&mut self, limit: usize) -> usize {
        let excess = self.timeline.len().saturating_sub(limit);
        if excess > 0 {
            let _ = self.timeline.drain(..excess);
        }
        excess
    }

    /// Input queue handle.
    pub fn queue(&self) -> &InputQueue {
        &self.queued
    }

    // ── Snapshot ────────────────────────────────────────────────────────

    /// Durable picture of this store. Opted-out and non-JSON-safe values are
    /// dropped.
    pub fn snapshot(&self) -> SessionSnapshot {
        let shared_state: BTreeMap<String, Value> = self
            .shared
            .iter()
            .filter(|(_, e)| e.persist)
            .filter_map(|(k, e)| {
                e.cell
                    .with_untracked(SharedValue::to_json)
                    .filter(json::round_trips)
                    .map(|v| (k.clone(), v))
            })
            .collect();

        let data_cache: BTreeMap<String, CachedData> = self
            .data
            .iter()
            .filter(|(_, d)| d.persist && d.error.is_none() && json::round_trips(&d.value))
            .map(|(k, d)| {
                (
                    k.clone(),
                    CachedData {
                        value: d.value.clone(),
                        tick: d.tick,
                        deps: d.deps.clone(),
                    },
                )
            })
            .collect();

        SessionSnapshot {
            version: SNAPSHOT_VERSION,
            session_id: self.session_id.clone(),
            tick: self.tick,
            timeline: Some(self.timeline.clone()),
            shared_state,
            data_cache,
            usage: self.usage,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Apply a snapshot's timeline, data cache, usage and tick. Shared state
    /// is applied only when `with_shared` is set.
    pub(crate) fn apply_snapshot(&mut self, snapshot: &SessionSnapshot, with_shared: bool) {
        self.tick = snapshot.tick;
        self.usage = snapshot.usage;
        self.timeline = snapshot.timeline.clone().unwrap_or_default();
        for (key, cached) in &snapshot.data_cache {
            self.insert_data(
                key.clone(),
                DataEntry {
                    value: cached.value.clone(),
                    tick: cached.tick,
                    deps: cached.deps.clone(),
                    persist: true,
                    error: None,
                },
            );
        }
        if with_shared {
            for (key, value) in &snapshot.shared_state {
                self.set_shared_json(key, value.clone());
            }
        }
    }
}
