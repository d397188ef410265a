//! Declarative tree, its evaluator and the normalized output.

pub mod element;
pub mod evaluator;
pub mod node;
pub mod output;

pub use element::{Component, ComponentElement, Element, HostElement, HostKind, Key, ProviderElement, Render};
pub use evaluator::{Evaluator, PassOutcome, PassReport, PendingEffects};
pub use node::{HookKind, TreeNodeId};
pub use output::{OutputKind, OutputNode, RenderOutput};

use serde_json::Value;

use crate::hooks::HookContext;

/// Pin a closure to the component signature so its argument types infer.
pub fn component_fn<F>(f: F) -> F
where
    F: Fn(&Value, &mut HookContext<'_>) -> Render + Send + Sync + 'static,
{
    f
}
