//! Session-wide state addressed by key.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;
use weft_reactive::Signal;

use crate::errors::Interrupt;
use crate::hooks::HookContext;
use crate::store::SharedValue;

/// Options for [`HookContext::use_shared_with`].
#[derive(Clone, Copy, Debug)]
pub struct SharedOptions {
    /// Include the value in snapshots.
    pub persist: bool,
}

impl Default for SharedOptions {
    fn default() -> Self {
        Self { persist: true }
    }
}

/// Handle to one shared-state key.
///
/// Reads inside a pass subscribe the session; writes from anywhere
/// re-evaluate every subscribed pass.
pub struct Shared<T> {
    key: Arc<str>,
    cell: Signal<SharedValue>,
    fallback: Arc<T>,
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            key: Arc::clone(&self.key),
            cell: self.cell.clone(),
            fallback: Arc::clone(&self.fallback),
        }
    }
}

impl<T> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared").field("key", &self.key).finish_non_exhaustive()
    }
}

impl<T> Shared<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) fn from_parts(key: impl Into<Arc<str>>, cell: Signal<SharedValue>, fallback: T) -> Self {
        Self {
            key: key.into(),
            cell,
            fallback: Arc::new(fallback),
        }
    }

    /// The key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current value, subscribing the running pass.
    pub fn get(&self) -> T {
        self.cell.with(|v| self.decode(v))
    }

    /// Current value without subscribing.
    pub fn get_untracked(&self) -> T {
        self.cell.with_untracked(|v| self.decode(v))
    }

    fn decode(&self, value: &SharedValue) -> T {
        value.decode().unwrap_or_else(|| {
            warn!(key = %self.key, "shared value has unexpected shape, using initial value");
            (*self.fallback).clone()
        })
    }

    /// Replace the value.
    pub fn set(&self, value: T) {
        self.cell.set(SharedValue::typed(value));
    }

    /// Mutate a copy of the value and write it back.
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let mut value = self.get_untracked();
        f(&mut value);
        self.set(value);
    }
}

impl HookContext<'_> {
    /// Session-wide state under `key`, persisted in snapshots.
    ///
    /// `init` runs when the key is absent or holds a value that does not
    /// decode as `T`.
    pub fn use_shared<T, F>(&mut self, key: &str, init: F) -> Result<Shared<T>, Interrupt>
    where
        T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        self.use_shared_with(key, SharedOptions::default(), init)
    }

    /// [`use_shared`](Self::use_shared) with options.
    pub fn use_shared_with<T, F>(
        &mut self,
        key: &str,
        options: SharedOptions,
        init: F,
    ) -> Result<Shared<T>, Interrupt>
    where
        T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        // Positional slot so the hook participates in order checking.
        let _ = self.use_custom(|| ())?;
        let key: Arc<str> = Arc::from(key);
        let store = self.store();

        let (cell, fallback) = match store.shared_entry(&key) {
            Some(entry) => {
                entry.persist = options.persist;
                let cell = entry.cell.clone();
                match cell.with_untracked(SharedValue::decode::<T>) {
                    Some(current) => (cell, current),
                    None => {
                        let initial = init();
                        warn!(key = %key, "shared value did not decode, reinitializing");
                        cell.set(SharedValue::typed(initial.clone()));
                        (cell, initial)
                    }
                }
            }
            None => {
                let initial = init();
                let cell = store.insert_shared(&key, SharedValue::typed(initial.clone()), options.persist);
                (cell, initial)
            }
        };

        let handle = Shared {
            key,
            cell,
            fallback: Arc::new(fallback),
        };
        // Subscribe the pass.
        let _ = handle.cell.with(|_| ());
        Ok(handle)
    }
}
