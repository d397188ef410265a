//! # weft-core
//!
//! Foundation types shared by every weft crate:
//!
//! - **Branded IDs**: [`SessionId`](ids::SessionId), [`EntryId`](ids::EntryId)
//! - **Timeline vocabulary**: [`TimelineEntry`](messages::TimelineEntry),
//!   [`Role`](messages::Role), [`ToolCall`](messages::ToolCall),
//!   [`UsageStats`](messages::UsageStats)
//! - **JSON safety**: helpers that keep snapshot content serializable
//! - **Settings**: compiled defaults, `~/.weft/settings.json`, `WEFT_*` overrides
//! - **Logging**: `tracing` subscriber initialization

#![deny(unsafe_code)]

pub mod constants;
pub mod ids;
pub mod json;
pub mod logging;
pub mod messages;
pub mod settings;

pub use ids::{EntryId, SessionId};
pub use messages::{Role, TimelineEntry, ToolCall, Usage, UsageStats};
pub use settings::{WeftSettings, get_settings};
