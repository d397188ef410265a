//! Timeline vocabulary.
//!
//! The timeline is the durable conversation record of a session: user input,
//! assistant replies and tool results, in order. Entries are plain JSON-safe
//! data so they can be snapshotted and restored verbatim.

use std::fmt;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::EntryId;

/// Speaker of a timeline entry or model message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Instructions outside the conversation proper.
    System,
    /// Human or application input.
    User,
    /// Model output.
    Assistant,
    /// Result of a tool call.
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

/// A tool call requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Call ID, echoed back in the matching tool result.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Tool arguments (usually a JSON object).
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    /// Build a call with a generated ID.
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: format!("call_{}", EntryId::new()),
            name: name.into(),
            arguments,
        }
    }
}

/// One entry of the session timeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    /// Entry ID.
    pub id: EntryId,
    /// Tick during which the entry was appended.
    pub tick: u64,
    /// Speaker.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Tool calls requested by an assistant entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool entries, the call this entry answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Whether a tool entry carries error content.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    /// RFC 3339 creation time.
    pub timestamp: String,
}

impl TimelineEntry {
    /// Create an entry with a fresh ID and the current time.
    pub fn new(tick: u64, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: EntryId::new(),
            tick,
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            is_error: false,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// User entry.
    pub fn user(tick: u64, content: impl Into<String>) -> Self {
        Self::new(tick, Role::User, content)
    }

    /// Assistant entry with optional tool calls.
    pub fn assistant(tick: u64, content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls,
            ..Self::new(tick, Role::Assistant, content)
        }
    }

    /// Tool result entry.
    pub fn tool_result(
        tick: u64,
        call_id: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            is_error,
            ..Self::new(tick, Role::Tool, content)
        }
    }
}

/// Token usage reported by one model call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    /// Prompt tokens.
    pub input_tokens: u64,
    /// Completion tokens.
    pub output_tokens: u64,
}

/// Usage accumulated over the lifetime of a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageStats {
    /// Total prompt tokens.
    pub input_tokens: u64,
    /// Total completion tokens.
    pub output_tokens: u64,
    /// Number of model calls.
    pub model_calls: u64,
    /// Number of completed ticks.
    pub ticks: u64,
}

impl UsageStats {
    /// Fold one model call into the totals.
    pub fn record_call(&mut self, usage: Usage) {
        self.input_tokens = self.input_tokens.saturating_add(usage.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(usage.output_tokens);
        self.model_calls += 1;
    }

    /// Total tokens in both directions.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Role::Assistant).unwrap(), "\"assistant\"");
        assert_eq!(Role::Tool.to_string(), "tool");
    }

    #[test]
    fn entry_skips_empty_optional_fields() {
        let entry = TimelineEntry::user(1, "hello");
        let value = serde_json::to_value(&entry).unwrap();
        assert!(value.get("toolCalls").is_none());
        assert!(value.get("toolCallId").is_none());
        assert!(value.get("isError").is_none());
        assert_eq!(value["role"], "user");
        assert_eq!(value["tick"], 1);
    }

    #[test]
    fn tool_result_entry_carries_call_id() {
        let entry = TimelineEntry::tool_result(3, "call_1", "boom", true);
        assert_eq!(entry.role, Role::Tool);
        assert_eq!(entry.tool_call_id.as_deref(), Some("call_1"));
        assert!(entry.is_error);
        let back: TimelineEntry =
            serde_json::from_value(serde_json::to_value(&entry).unwrap()).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn assistant_entry_keeps_tool_calls() {
        let call = ToolCall::new("search", json!({"q": "rust"}));
        let entry = TimelineEntry::assistant(2, "", vec![call.clone()]);
        assert_eq!(entry.tool_calls, vec![call]);
    }

    #[test]
    fn usage_stats_accumulate() {
        let mut stats = UsageStats::default();
        stats.record_call(Usage { input_tokens: 10, output_tokens: 5 });
        stats.record_call(Usage { input_tokens: 1, output_tokens: 2 });
        assert_eq!(stats.model_calls, 2);
        assert_eq!(stats.total_tokens(), 18);
    }
}
