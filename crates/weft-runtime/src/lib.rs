//! # weft-runtime
//!
//! Tick-driven agent runtime.
//!
//! - **Tree**: declarative [`Element`]s evaluated incrementally against a
//!   persistent node tree; hook slots survive between passes
//! - **Hooks**: state, effects, memo, callbacks, refs, context, shared state,
//!   async data with suspension, lifecycle callbacks, gates and knobs
//! - **Scheduler**: explicit passes for ticks, coalesced background passes
//!   for tracked state changes
//! - **Session**: the tick loop (evaluate → format → model → tools →
//!   continuation), snapshots and restore
//! - **Manager**: live sessions of one agent
//!
//! ## Crate Position
//!
//! Top layer. Depends on: weft-core, weft-reactive, weft-store.

#![deny(unsafe_code)]

pub mod controls;
pub mod errors;
pub mod hooks;
pub mod mock;
pub mod model;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod tree;

pub use controls::{Gate, GateContext, GateSpec, GateState, Knob, KnobSpec};
pub use errors::{Interrupt, ProgrammingError, RuntimeError};
pub use hooks::{
    AsyncOptions, Callback, ExecutionEnd, HookContext, Loadable, Ref, Setter, Shared, SharedOptions, TickEnd,
    TickStart,
};
pub use model::{
    DefaultFormatter, Formatter, ModelAdapter, ModelError, ModelInput, ModelMessage, ModelOutput, ToolDescriptor,
    ToolExecutor,
};
pub use scheduler::{BusyGuard, ReconcileEvent, Scheduler, SchedulerState, Trigger};
pub use session::{
    Agent, AgentBuilder, Continuation, EventKind, ExecutionStatus, ListenerId, SendOutcome, Session, SessionConfig,
    SessionEvent, SessionManager,
};
pub use store::{InputQueue, RuntimeStore, SharedValue};
pub use tree::{Component, Element, HostKind, Key, OutputKind, OutputNode, Render, RenderOutput, component_fn};
