//! Narrow interfaces to the external collaborators: the model adapter, the
//! output formatter and the tool executor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use weft_core::{Role, TimelineEntry, ToolCall, Usage};

use crate::tree::{OutputKind, OutputNode, RenderOutput};

/// A tool offered to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name.
    pub name: String,
    /// What the tool does.
    #[serde(default)]
    pub description: String,
    /// JSON Schema of the arguments.
    #[serde(default)]
    pub parameters: Value,
}

impl ToolDescriptor {
    /// Descriptor with an object schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// One message of model input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelMessage {
    /// Speaker.
    pub role: Role,
    /// Text.
    pub content: String,
    /// Tool calls made by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Call answered by a tool message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl From<&TimelineEntry> for ModelMessage {
    fn from(entry: &TimelineEntry) -> Self {
        Self {
            role: entry.role,
            content: entry.content.clone(),
            tool_calls: entry.tool_calls.clone(),
            tool_call_id: entry.tool_call_id.clone(),
        }
    }
}

/// Everything sent to the model for one tick.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelInput {
    /// System prompt.
    pub system: String,
    /// Conversation.
    pub messages: Vec<ModelMessage>,
    /// Tools offered.
    pub tools: Vec<ToolDescriptor>,
}

/// The model's reply for one tick.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelOutput {
    /// Text reply.
    #[serde(default)]
    pub content: String,
    /// Tool calls requested.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Token usage.
    #[serde(default)]
    pub usage: Usage,
}

impl ModelOutput {
    /// Text-only reply.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    /// Reply that calls one tool.
    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_calls: vec![ToolCall::new(name, arguments)],
            ..Self::default()
        }
    }

    /// Attach usage.
    #[must_use]
    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.usage = Usage {
            input_tokens,
            output_tokens,
        };
        self
    }
}

/// Model adapter failure.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// Provider-side failure.
    #[error("provider error: {0}")]
    Provider(String),
    /// Rate limited; retry later.
    #[error("rate limited")]
    RateLimited {
        /// Suggested wait.
        retry_after_ms: Option<u64>,
    },
    /// Input rejected.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ModelError {
    /// Whether retrying may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Provider(_))
    }
}

/// Calls the model. Invoked exactly once per tick.
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Produce a reply.
    async fn call(&self, input: ModelInput) -> Result<ModelOutput, ModelError>;
}

/// Turns evaluation output plus the timeline into model input.
pub trait Formatter: Send + Sync {
    /// Build the model input. Must be pure.
    fn format(&self, output: &RenderOutput, timeline: &[TimelineEntry]) -> ModelInput;
}

/// Runs a tool the model called.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Execute `call` against `tool`; `Err` content becomes an error entry.
    async fn execute(&self, tool: &ToolDescriptor, call: &ToolCall) -> Result<Value, String>;
}

/// Markdown formatter: sections become `#` headings in the system prompt,
/// message nodes precede the timeline, tool nodes become descriptors.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultFormatter;

impl DefaultFormatter {
    fn render_node(node: &OutputNode, depth: usize, out: &mut Vec<String>) {
        match node.kind {
            OutputKind::Section => {
                if let Some(title) = node.title() {
                    out.push(format!("{} {title}", "#".repeat(depth.min(6))));
                }
                for child in &node.children {
                    Self::render_node(child, depth + 1, out);
                }
            }
            OutputKind::Group => {
                for child in &node.children {
                    Self::render_node(child, depth, out);
                }
            }
            OutputKind::Text => {
                if let Some(t) = &node.text {
                    out.push(t.clone());
                }
            }
            OutputKind::Message | OutputKind::Tool => {}
        }
    }
}

impl Formatter for DefaultFormatter {
    fn format(&self, output: &RenderOutput, timeline: &[TimelineEntry]) -> ModelInput {
        let mut lines = Vec::new();
        for node in &output.nodes {
            Self::render_node(node, 1, &mut lines);
        }

        let mut messages: Vec<ModelMessage> = output
            .messages()
            .into_iter()
            .map(|(role, content)| ModelMessage {
                role,
                content,
                tool_calls: Vec::new(),
                tool_call_id: None,
            })
            .collect();
        messages.extend(timeline.iter().map(ModelMessage::from));

        ModelInput {
            system: lines.join("\n"),
            messages,
            tools: output.tools(),
        }
    }
}
