//! Async data with suspension.
//!
//! `use_async` never awaits. On a cache miss it starts the fetch, records it
//! as pending in the store and returns [`Loadable::Pending`]; a component
//! that needs the value propagates [`Loadable::ready`]'s suspension with
//! `?`. The session awaits pending fetches, caches the results and retries
//! the pass.

use std::future::Future;

use futures::FutureExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use weft_core::json;

use crate::errors::Interrupt;
use crate::hooks::HookContext;
use crate::store::PendingFetch;

/// Options for [`HookContext::use_async_with`].
#[derive(Clone, Copy, Debug, Default)]
pub struct AsyncOptions {
    /// Include the resolved value in snapshots.
    pub persist: bool,
    /// Refetch once the entry is older than this many ticks.
    pub max_age_ticks: Option<u64>,
}

impl AsyncOptions {
    /// Persisted, never stale.
    pub fn persisted() -> Self {
        Self {
            persist: true,
            max_age_ticks: None,
        }
    }
}

/// State of an async-data key.
#[derive(Clone, Debug, PartialEq)]
pub enum Loadable<T> {
    /// Value available.
    Ready(T),
    /// Fetch in flight.
    Pending {
        /// Key awaited.
        key: String,
    },
    /// Fetch failed.
    Failed {
        /// Key that failed.
        key: String,
        /// Failure description.
        message: String,
    },
}

impl<T> Loadable<T> {
    /// The value, or the interrupt a component should propagate: suspension
    /// while pending, failure otherwise.
    pub fn ready(self) -> Result<T, Interrupt> {
        match self {
            Self::Ready(v) => Ok(v),
            Self::Pending { key } => Err(Interrupt::Suspended { key }),
            Self::Failed { key, message } => Err(Interrupt::Failed(format!("{key}: {message}"))),
        }
    }

    /// Whether the value is available.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Whether a fetch is in flight.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }

    /// The value, if available.
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Ready(v) => Some(v),
            _ => None,
        }
    }
}

impl HookContext<'_> {
    /// Load data under `key`, fetched again whenever `deps` change.
    pub fn use_async<T, F, Fut>(&mut self, key: &str, deps: Vec<Value>, fetcher: F) -> Result<Loadable<T>, Interrupt>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.use_async_with(key, deps, AsyncOptions::default(), fetcher)
    }

    /// [`use_async`](Self::use_async) with options.
    pub fn use_async_with<T, F, Fut>(
        &mut self,
        key: &str,
        deps: Vec<Value>,
        options: AsyncOptions,
        fetcher: F,
    ) -> Result<Loadable<T>, Interrupt>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let _ = self.use_custom(|| ())?;
        let tick = self.tick();
        let store = self.store();

        if let Some(entry) = store.data(key) {
            let stale = options
                .max_age_ticks
                .is_some_and(|max| tick.saturating_sub(entry.tick) > max);
            if entry.deps == deps && !stale {
                if let Some(message) = &entry.error {
                    return Ok(Loadable::Failed {
                        key: key.to_owned(),
                        message: message.clone(),
                    });
                }
                return match json::decode::<T>(&entry.value) {
                    Some(v) => Ok(Loadable::Ready(v)),
                    None => {
                        warn!(key, "cached value has unexpected shape, refetching");
                        self.start_fetch(key, deps, options, fetcher)
                    }
                };
            }
            debug!(key, stale, "cached value out of date");
        }

        if store.pending_deps(key).is_some_and(|d| d == deps.as_slice()) {
            return Ok(Loadable::Pending { key: key.to_owned() });
        }
        self.start_fetch(key, deps, options, fetcher)
    }

    fn start_fetch<T, F, Fut>(
        &mut self,
        key: &str,
        deps: Vec<Value>,
        options: AsyncOptions,
        fetcher: F,
    ) -> Result<Loadable<T>, Interrupt>
    where
        T: Serialize + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let future = fetcher()
            .map(|result| match result {
                Ok(value) => json::encode(&value)
                    .ok_or_else(|| "fetched value is not JSON-safe".to_owned()),
                Err(e) => Err(format!("{e:#}")),
            })
            .boxed();
        self.store().register_fetch(
            key,
            PendingFetch {
                future,
                deps,
                persist: options.persist,
            },
        )?;
        Ok(Loadable::Pending { key: key.to_owned() })
    }
}
