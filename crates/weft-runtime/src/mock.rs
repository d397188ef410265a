//! Scripted collaborators for tests and demos.
//!
//! [`ScriptedModel`] replays a fixed list of replies and records every input
//! it saw; [`StaticTools`] answers tool calls from a table.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use weft_core::ToolCall;

use crate::model::{ModelAdapter, ModelError, ModelInput, ModelOutput, ToolDescriptor, ToolExecutor};

#[derive(Default)]
struct Script {
    replies: VecDeque<ModelOutput>,
    fallback: Option<ModelOutput>,
    inputs: Vec<ModelInput>,
}

/// Model that returns queued replies in order.
///
/// Once the queue is empty it repeats the fallback, or fails with
/// [`ModelError::InvalidRequest`] when there is none. Clones share state.
#[derive(Clone, Default)]
pub struct ScriptedModel {
    script: Arc<Mutex<Script>>,
}

impl std::fmt::Debug for ScriptedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.script.lock();
        f.debug_struct("ScriptedModel")
            .field("remaining", &s.replies.len())
            .field("calls", &s.inputs.len())
            .finish()
    }
}

impl ScriptedModel {
    /// Model replaying `replies`.
    pub fn new(replies: impl IntoIterator<Item = ModelOutput>) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                replies: replies.into_iter().collect(),
                ..Script::default()
            })),
        }
    }

    /// Reply used after the script runs out.
    #[must_use]
    pub fn with_fallback(self, reply: ModelOutput) -> Self {
        self.script.lock().fallback = Some(reply);
        self
    }

    /// Append a reply.
    pub fn push(&self, reply: ModelOutput) {
        self.script.lock().replies.push_back(reply);
    }

    /// Calls made so far.
    pub fn call_count(&self) -> usize {
        self.script.lock().inputs.len()
    }

    /// Every input received, oldest first.
    pub fn inputs(&self) -> Vec<ModelInput> {
        self.script.lock().inputs.clone()
    }

    /// The most recent input.
    pub fn last_input(&self) -> Option<ModelInput> {
        self.script.lock().inputs.last().cloned()
    }
}

#[async_trait]
impl ModelAdapter for ScriptedModel {
    async fn call(&self, input: ModelInput) -> Result<ModelOutput, ModelError> {
        let mut script = self.script.lock();
        script.inputs.push(input);
        match script.replies.pop_front() {
            Some(reply) => Ok(reply),
            None => script
                .fallback
                .clone()
                .ok_or_else(|| ModelError::InvalidRequest("script exhausted".into())),
        }
    }
}

/// Tool executor answering from a name → result table.
#[derive(Clone, Default)]
pub struct StaticTools {
    results: Arc<HashMap<String, Result<Value, String>>>,
    calls: Arc<Mutex<Vec<ToolCall>>>,
}

impl std::fmt::Debug for StaticTools {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTools")
            .field("tools", &self.results.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl StaticTools {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// `name` succeeds with `value`.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        let _ = Arc::make_mut(&mut self.results).insert(name.into(), Ok(value));
        self
    }

    /// `name` fails with `message`.
    #[must_use]
    pub fn failing(mut self, name: impl Into<String>, message: impl Into<String>) -> Self {
        let _ = Arc::make_mut(&mut self.results).insert(name.into(), Err(message.into()));
        self
    }

    /// Calls received, oldest first.
    pub fn calls(&self) -> Vec<ToolCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ToolExecutor for StaticTools {
    async fn execute(&self, tool: &ToolDescriptor, call: &ToolCall) -> Result<Value, String> {
        self.calls.lock().push(call.clone());
        self.results
            .get(&tool.name)
            .cloned()
            .unwrap_or_else(|| Err(format!("no result configured for {}", tool.name)))
    }
}
