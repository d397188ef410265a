//! Session events: broadcast to subscribers and dispatched to listeners.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::scheduler::Trigger;
use crate::session::continuation::{Continuation, ExecutionStatus};

const DEFAULT_CAPACITY: usize = 256;

/// Something that happened in a session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A pass started.
    Reconcile {
        /// What started it.
        trigger: Trigger,
        /// Why.
        reason: String,
        /// Pass number.
        pass: u64,
    },
    /// A tick started.
    TickStart {
        /// Tick number.
        tick: u64,
    },
    /// A tool call was handled.
    ToolCall {
        /// Tick number.
        tick: u64,
        /// Tool name.
        name: String,
        /// Whether it produced an error entry.
        is_error: bool,
    },
    /// A tick finished.
    TickEnd {
        /// Tick number.
        tick: u64,
        /// Final decision after callbacks and gates.
        decision: Continuation,
    },
    /// An execution finished.
    ExecutionEnd {
        /// How it ended.
        status: ExecutionStatus,
        /// Ticks it ran.
        ticks: u32,
    },
    /// Saving a snapshot failed.
    PersistFailed {
        /// Store error text.
        message: String,
    },
    /// The session was closed.
    Closed,
}

/// Discriminant of [`SessionEvent`], used to filter listeners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`SessionEvent::Reconcile`].
    Reconcile,
    /// [`SessionEvent::TickStart`].
    TickStart,
    /// [`SessionEvent::ToolCall`].
    ToolCall,
    /// [`SessionEvent::TickEnd`].
    TickEnd,
    /// [`SessionEvent::ExecutionEnd`].
    ExecutionEnd,
    /// [`SessionEvent::PersistFailed`].
    PersistFailed,
    /// [`SessionEvent::Closed`].
    Closed,
}

impl SessionEvent {
    /// Discriminant.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Reconcile { .. } => EventKind::Reconcile,
            Self::TickStart { .. } => EventKind::TickStart,
            Self::ToolCall { .. } => EventKind::ToolCall,
            Self::TickEnd { .. } => EventKind::TickEnd,
            Self::ExecutionEnd { .. } => EventKind::ExecutionEnd,
            Self::PersistFailed { .. } => EventKind::PersistFailed,
            Self::Closed => EventKind::Closed,
        }
    }
}

/// Returned by [`EventBus::on`]; pass to [`EventBus::off`] to unregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Fan-out for session events.
///
/// Listeners run synchronously on the emitting task and must not call back
/// into the session. Broadcast subscribers that lag lose events rather than
/// blocking the session.
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
    listeners: RwLock<Vec<(ListenerId, EventKind, Listener)>>,
    next_id: AtomicU64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.read().len())
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Bus with the default channel capacity.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self {
            tx,
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Deliver `event` to matching listeners and all subscribers.
    pub fn emit(&self, event: SessionEvent) {
        let kind = event.kind();
        let matching: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, l)| Arc::clone(l))
            .collect();
        for listener in matching {
            listener(&event);
        }
        let _ = self.tx.send(event);
    }

    /// Call `f` for every event of `kind`.
    pub fn on(&self, kind: EventKind, f: impl Fn(&SessionEvent) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, kind, Arc::new(f)));
        id
    }

    /// Remove a listener. Returns whether it existed.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(l, _, _)| *l != id);
        listeners.len() != before
    }

    /// Receive every event emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}
