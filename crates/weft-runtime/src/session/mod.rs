//! Session lifecycle: agents, session handles, the tick loop, restore, and
//! the session manager.

pub mod agent;
pub mod continuation;
pub mod events;
pub mod handle;
pub mod manager;
pub mod restore;
mod tick;

pub use agent::{Agent, AgentBuilder, SessionConfig};
pub use continuation::{Continuation, ExecutionStatus, SendOutcome};
pub use events::{EventBus, EventKind, ListenerId, SessionEvent};
pub use handle::Session;
pub use manager::SessionManager;
pub use restore::RestoreOptions;
