//! # weft-reactive
//!
//! Fine-grained reactive cells with automatic dependency tracking.
//!
//! - [`Signal`]: writable cell; reads inside a tracking scope subscribe
//! - [`Computed`]: lazy derived value, recomputed on the first read after a change
//! - [`Effect`]: runs on creation and whenever a dependency changes, with cleanup
//! - [`Tracker`]: records reads for a caller-supplied change callback
//! - [`batch`] / [`untracked`]: defer notifications, suspend tracking
//!
//! Every node belongs to a [`ReactiveRuntime`]. The free functions in this
//! module use [`ReactiveRuntime::current`]: the innermost runtime entered on
//! this thread, or the process-wide default.

#![deny(unsafe_code)]

pub mod computed;
pub mod effect;
pub mod errors;
pub mod runtime;
pub mod signal;
pub mod tracker;

pub use computed::Computed;
pub use effect::{Cleanup, Effect, IntoCleanup, MAX_EFFECT_RERUNS};
pub use errors::{ReactiveError, Result};
pub use runtime::{NodeId, ReactiveRuntime};
pub use signal::Signal;
pub use tracker::Tracker;

/// Create a signal in the current runtime.
pub fn signal<T: Send + Sync + 'static>(initial: T) -> Signal<T> {
    ReactiveRuntime::current().signal(initial)
}

/// Create a computed value in the current runtime.
pub fn computed<T, F>(f: F) -> Computed<T>
where
    T: Clone + Send + Sync + 'static,
    F: Fn() -> T + Send + Sync + 'static,
{
    ReactiveRuntime::current().computed(f)
}

/// Create an effect in the current runtime.
pub fn effect<R, F>(f: F) -> Effect
where
    R: IntoCleanup,
    F: FnMut() -> R + Send + 'static,
{
    ReactiveRuntime::current().effect(f)
}

/// Batch notifications in the current runtime.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    ReactiveRuntime::current().batch(f)
}

/// Suspend tracking in the current runtime.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    ReactiveRuntime::current().untracked(f)
}
