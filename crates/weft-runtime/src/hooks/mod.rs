//! Hooks: per-node state addressed by call order.
//!
//! A component receives a [`HookContext`] and calls hooks on it. Each call
//! consumes the next slot of the node; the kind recorded at a slot must not
//! change between evaluations, and neither may the number of calls. A
//! violation is a [`ProgrammingError`] and aborts the pass.
//!
//! A pass works on a copy of each node's slot list. State writes made by
//! the render are held until the pass commits, and ref writes are rolled
//! back if it is discarded, so a retried pass sees the same slots as the
//! first attempt.

pub mod data;
pub(crate) mod journal;
pub mod lifecycle;
pub mod shared;

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use weft_core::{SessionId, TimelineEntry};
use weft_reactive::{IntoCleanup, Signal};

use crate::errors::{Interrupt, ProgrammingError};
use crate::hooks::journal::PassJournal;
use crate::store::RuntimeStore;
use crate::tree::evaluator::{Frame, PendingEffect};
use crate::tree::{HookKind, TreeNodeId};
use crate::tree::node::{CleanupCell, HookSlot};

pub use data::{AsyncOptions, Loadable};
pub use lifecycle::{ExecutionEnd, TickEnd, TickStart};
pub use shared::{Shared, SharedOptions};

/// Build a dependency list from anything serializable.
///
/// Values that fail to serialize become `null`.
#[macro_export]
macro_rules! deps {
    () => { ::std::vec::Vec::<::serde_json::Value>::new() };
    ($($dep:expr),+ $(,)?) => {
        vec![$(::serde_json::to_value(&$dep).unwrap_or(::serde_json::Value::Null)),+]
    };
}

/// Context value visible to a subtree.
pub(crate) type ContextEntry = (TypeId, Arc<dyn Any + Send + Sync>);

/// Handle passed to a component's `render`.
pub struct HookContext<'a> {
    pub(crate) node: TreeNodeId,
    pub(crate) name: &'static str,
    pub(crate) slots: &'a mut Vec<HookSlot>,
    pub(crate) cursor: usize,
    pub(crate) mounting: bool,
    pub(crate) store: &'a mut RuntimeStore,
    pub(crate) frame: &'a mut Frame,
    pub(crate) contexts: &'a [ContextEntry],
}

impl fmt::Debug for HookContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookContext")
            .field("node", &self.node)
            .field("component", &self.name)
            .field("cursor", &self.cursor)
            .field("mounting", &self.mounting)
            .finish_non_exhaustive()
    }
}

impl HookContext<'_> {
    // ── Slot bookkeeping ────────────────────────────────────────────────

    /// Claim the next slot. Returns its index and whether it must be created.
    fn claim(&mut self, kind: HookKind) -> Result<(usize, bool), Interrupt> {
        let idx = self.cursor;
        self.cursor += 1;
        if let Some(slot) = self.slots.get(idx) {
            let found = slot.kind();
            if found != kind {
                return Err(ProgrammingError::HookKindMismatch {
                    component: self.name.to_owned(),
                    slot: idx,
                    expected: found,
                    found: kind,
                }
                .into());
            }
            Ok((idx, false))
        } else if self.mounting {
            Ok((idx, true))
        } else {
            Err(ProgrammingError::HookCountMismatch {
                component: self.name.to_owned(),
                expected: self.slots.len(),
                found: idx + 1,
            }
            .into())
        }
    }

    fn type_mismatch<T>(&self, slot: usize) -> Interrupt {
        ProgrammingError::HookTypeMismatch {
            component: self.name.to_owned(),
            slot,
            expected: type_name::<T>(),
        }
        .into()
    }

    fn downcast<T: Any + Send + Sync>(
        &self,
        slot: usize,
        value: &Arc<dyn Any + Send + Sync>,
    ) -> Result<Arc<T>, Interrupt> {
        Arc::clone(value)
            .downcast::<T>()
            .map_err(|_| self.type_mismatch::<T>(slot))
    }

    /// Custom slot that also returns its index, used by hooks that register
    /// against their owning slot.
    pub(crate) fn custom_slot<T, F>(
        &mut self,
        init: F,
        on_unmount: Option<Arc<dyn Fn(&T) + Send + Sync>>,
    ) -> Result<(usize, Arc<T>), Interrupt>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let (idx, fresh) = self.claim(HookKind::Custom)?;
        if fresh {
            let value = Arc::new(init());
            let action = on_unmount.map(|f| {
                let v = Arc::clone(&value);
                Arc::new(move || f(&v)) as Arc<dyn Fn() + Send + Sync>
            });
            self.slots.push(HookSlot::Custom {
                value: Arc::clone(&value) as Arc<dyn Any + Send + Sync>,
                on_unmount: action,
            });
            return Ok((idx, value));
        }
        match &self.slots[idx] {
            HookSlot::Custom { value, .. } => {
                let value = Arc::clone(value);
                Ok((idx, self.downcast::<T>(idx, &value)?))
            }
            _ => Err(self.type_mismatch::<T>(idx)),
        }
    }

    pub(crate) fn owner(&self, slot: usize) -> (TreeNodeId, usize) {
        (self.node, slot)
    }

    pub(crate) fn store(&mut self) -> &mut RuntimeStore {
        self.store
    }

    pub(crate) fn frame(&mut self) -> &mut Frame {
        self.frame
    }

    // ── Accessors ───────────────────────────────────────────────────────

    /// Name of the component being evaluated.
    pub fn component_name(&self) -> &'static str {
        self.name
    }

    /// Whether this is the node's first evaluation.
    pub fn is_mounting(&self) -> bool {
        self.mounting
    }

    /// Current tick.
    pub fn tick(&self) -> u64 {
        self.store.tick()
    }

    /// Owning session.
    pub fn session_id(&self) -> &SessionId {
        self.store.session_id()
    }

    /// The conversation so far.
    pub fn timeline(&self) -> &[TimelineEntry] {
        self.store.timeline()
    }

    // ── Basic hooks ─────────────────────────────────────────────────────

    /// Local state. Setting it re-evaluates the tree.
    pub fn use_state<T, F>(&mut self, init: F) -> Result<(T, Setter<T>), Interrupt>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let (idx, fresh) = self.claim(HookKind::State)?;
        let signal = if fresh {
            let signal = self.store.reactive().signal(init());
            self.slots.push(HookSlot::State(Arc::new(signal.clone())));
            signal
        } else {
            match &self.slots[idx] {
                HookSlot::State(any) => {
                    let any = Arc::clone(any);
                    (*self.downcast::<Signal<T>>(idx, &any)?).clone()
                }
                _ => return Err(self.type_mismatch::<T>(idx)),
            }
        };
        let value = signal.get();
        Ok((
            value,
            Setter {
                signal,
                journal: self.store.journal().clone(),
            },
        ))
    }

    /// Run `effect` after the pass commits, whenever `deps` changed since
    /// the last committed run. The previous cleanup runs first.
    pub fn use_effect<R, F>(&mut self, deps: Vec<Value>, effect: F) -> Result<(), Interrupt>
    where
        R: IntoCleanup,
        F: FnOnce() -> R + Send + 'static,
    {
        self.effect_slot(Some(deps), effect)
    }

    /// Run `effect` after every committed pass.
    pub fn use_effect_always<R, F>(&mut self, effect: F) -> Result<(), Interrupt>
    where
        R: IntoCleanup,
        F: FnOnce() -> R + Send + 'static,
    {
        self.effect_slot(None, effect)
    }

    fn effect_slot<R, F>(&mut self, deps: Option<Vec<Value>>, effect: F) -> Result<(), Interrupt>
    where
        R: IntoCleanup,
        F: FnOnce() -> R + Send + 'static,
    {
        let (idx, fresh) = self.claim(HookKind::Effect)?;
        if fresh {
            self.slots.push(HookSlot::Effect {
                deps: None,
                cleanup: CleanupCell::default(),
            });
        }
        let HookSlot::Effect {
            deps: recorded,
            cleanup,
        } = &mut self.slots[idx]
        else {
            return Err(self.type_mismatch::<CleanupCell>(idx));
        };
        let changed = fresh || deps.is_none() || *recorded != deps;
        if changed {
            *recorded = deps;
            self.frame.effects.push(PendingEffect {
                cleanup: Arc::clone(cleanup),
                run: Box::new(move || effect().into_cleanup()),
            });
        }
        Ok(())
    }

    /// Value recomputed only when `deps` change.
    pub fn use_memo<T, F>(&mut self, deps: Vec<Value>, compute: F) -> Result<T, Interrupt>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let (idx, fresh) = self.claim(HookKind::Memo)?;
        if fresh {
            let value = compute();
            self.slots.push(HookSlot::Memo {
                deps,
                value: Arc::new(value.clone()),
            });
            return Ok(value);
        }
        let (same, stored) = match &self.slots[idx] {
            HookSlot::Memo { deps: recorded, value } => (*recorded == deps, Arc::clone(value)),
            _ => return Err(self.type_mismatch::<T>(idx)),
        };
        if same {
            return Ok((*self.downcast::<T>(idx, &stored)?).clone());
        }
        let value = compute();
        self.slots[idx] = HookSlot::Memo {
            deps,
            value: Arc::new(value.clone()),
        };
        Ok(value)
    }

    /// Stable callback whose body is replaced on every committed pass.
    pub fn use_callback<A, R, F>(&mut self, f: F) -> Result<Callback<A, R>, Interrupt>
    where
        A: 'static,
        R: 'static,
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        let (idx, fresh) = self.claim(HookKind::Callback)?;
        if fresh {
            let cb = Callback::new(f);
            self.slots.push(HookSlot::Callback(Arc::new(cb.clone())));
            return Ok(cb);
        }
        let cb = match &self.slots[idx] {
            HookSlot::Callback(any) => {
                let any = Arc::clone(any);
                (*self.downcast::<Callback<A, R>>(idx, &any)?).clone()
            }
            _ => return Err(self.type_mismatch::<Callback<A, R>>(idx)),
        };
        let target = cb.clone();
        self.frame
            .commit_actions
            .push(Box::new(move || target.replace(f)));
        Ok(cb)
    }

    /// Mutable cell that survives evaluations without triggering them.
    pub fn use_ref<T, F>(&mut self, init: F) -> Result<Ref<T>, Interrupt>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let (idx, fresh) = self.claim(HookKind::Ref)?;
        if fresh {
            let r = Ref {
                inner: Arc::new(Mutex::new(init())),
                snapshot: T::clone,
                journal: self.store.journal().clone(),
            };
            self.slots.push(HookSlot::Ref(Arc::new(r.clone())));
            return Ok(r);
        }
        match &self.slots[idx] {
            HookSlot::Ref(any) => {
                let any = Arc::clone(any);
                Ok((*self.downcast::<Ref<T>>(idx, &any)?).clone())
            }
            _ => Err(self.type_mismatch::<Ref<T>>(idx)),
        }
    }

    /// Nearest value of type `T` provided by an ancestor.
    pub fn use_context<T: Send + Sync + 'static>(&mut self) -> Result<Option<Arc<T>>, Interrupt> {
        let (idx, fresh) = self.claim(HookKind::Context)?;
        let wanted = TypeId::of::<T>();
        if fresh {
            self.slots.push(HookSlot::Context(wanted));
        } else if !matches!(self.slots[idx], HookSlot::Context(t) if t == wanted) {
            return Err(self.type_mismatch::<T>(idx));
        }
        Ok(self
            .contexts
            .iter()
            .rev()
            .find(|(t, _)| *t == wanted)
            .and_then(|(_, v)| Arc::clone(v).downcast::<T>().ok()))
    }

    /// Arbitrary per-node value created once.
    pub fn use_custom<T, F>(&mut self, init: F) -> Result<Arc<T>, Interrupt>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        self.custom_slot(init, None).map(|(_, v)| v)
    }

    /// Per-node value with an action run when the node unmounts.
    pub fn use_custom_with_unmount<T, F, U>(&mut self, init: F, on_unmount: U) -> Result<Arc<T>, Interrupt>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> T,
        U: Fn(&T) + Send + Sync + 'static,
    {
        self.custom_slot(init, Some(Arc::new(on_unmount)))
            .map(|(_, v)| v)
    }
}

/// Writer half of [`HookContext::use_state`].
///
/// A write made while the owning session is evaluating takes effect when
/// the pass commits, and is dropped if the pass suspends.
#[derive(Clone, Debug)]
pub struct Setter<T> {
    signal: Signal<T>,
    journal: PassJournal,
}

impl<T: Send + Sync + 'static> Setter<T> {
    /// Replace the value.
    pub fn set(&self, value: T) {
        let signal = self.signal.clone();
        self.journal.write_or_defer(move || signal.set(value));
    }

    /// Mutate the value in place.
    pub fn update(&self, f: impl FnOnce(&mut T) + Send + 'static) {
        let signal = self.signal.clone();
        self.journal.write_or_defer(move || signal.update(f));
    }
}

impl<T: Clone + Send + Sync + 'static> Setter<T> {
    /// Latest committed value, without subscribing.
    pub fn get(&self) -> T {
        self.signal.get_untracked()
    }
}

type CallbackFn<A, R> = Arc<dyn Fn(A) -> R + Send + Sync>;

/// Stable callback handle from [`HookContext::use_callback`].
pub struct Callback<A, R> {
    inner: Arc<RwLock<CallbackFn<A, R>>>,
}

impl<A, R> Clone for Callback<A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, R> fmt::Debug for Callback<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Callback")
    }
}

impl<A, R> Callback<A, R> {
    fn new(f: impl Fn(A) -> R + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(f))),
        }
    }

    fn replace(&self, f: impl Fn(A) -> R + Send + Sync + 'static) {
        *self.inner.write() = Arc::new(f);
    }

    /// Invoke the latest committed body.
    pub fn call(&self, arg: A) -> R {
        let f = Arc::clone(&self.inner.read());
        f(arg)
    }

    /// Whether both handles are the same callback.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Mutable cell from [`HookContext::use_ref`].
///
/// Writes are visible at once. Those made by a pass that is later
/// discarded are rolled back.
pub struct Ref<T> {
    inner: Arc<Mutex<T>>,
    snapshot: fn(&T) -> T,
    journal: PassJournal,
}

impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            snapshot: self.snapshot,
            journal: self.journal.clone(),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Ref").field(&*self.inner.lock()).finish()
    }
}

impl<T: Send + 'static> Ref<T> {
    /// Read through a closure.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.lock())
    }

    /// Mutate through a closure.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.remember();
        f(&mut self.inner.lock())
    }

    /// Replace the value.
    pub fn set(&self, value: T) {
        self.remember();
        *self.inner.lock() = value;
    }

    fn remember(&self) {
        let id = Arc::as_ptr(&self.inner) as *const () as usize;
        self.journal.remember(id, || {
            let old = (self.snapshot)(&self.inner.lock());
            let cell = Arc::clone(&self.inner);
            let undo: Box<dyn FnOnce() + Send> = Box::new(move || *cell.lock() = old);
            undo
        });
    }
}

impl<T: Clone> Ref<T> {
    /// Copy of the value.
    pub fn get(&self) -> T {
        self.inner.lock().clone()
    }
}
