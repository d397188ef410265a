//! Agent definition: the root element plus collaborators, shared by every
//! session created from it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use weft_core::settings::RuntimeSettings;
use weft_core::{SessionId, get_settings};
use weft_store::{MemorySessionStore, SessionSnapshot, SessionStore, StoreError};

use crate::errors::RuntimeError;
use crate::model::{DefaultFormatter, Formatter, ModelAdapter, ToolExecutor};
use crate::session::handle::Session;
use crate::session::restore::RestoreOptions;
use crate::tree::Element;

/// Per-session limits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Tick cap per execution.
    pub max_ticks: u32,
    /// Suspensions tolerated while stabilizing one evaluation.
    pub max_suspensions: u32,
    /// Per-fetch timeout.
    pub fetch_timeout: Duration,
    /// Timeline cap; oldest entries are dropped beyond it.
    pub max_timeline_entries: Option<usize>,
}

impl SessionConfig {
    /// Limits from the runtime settings section.
    pub fn from_settings(settings: &RuntimeSettings) -> Self {
        Self {
            max_ticks: settings.max_ticks,
            max_suspensions: settings.max_suspensions,
            fetch_timeout: Duration::from_millis(settings.fetch_timeout_ms),
            max_timeline_entries: settings.max_timeline_entries,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_settings(&RuntimeSettings::default())
    }
}

pub(crate) struct AgentParts {
    pub(crate) root: Element,
    pub(crate) model: Arc<dyn ModelAdapter>,
    pub(crate) formatter: Arc<dyn Formatter>,
    pub(crate) tools: Option<Arc<dyn ToolExecutor>>,
    pub(crate) store: Arc<dyn SessionStore>,
    pub(crate) config: SessionConfig,
    pub(crate) restore: RestoreOptions,
}

/// A configured agent. Cheap to clone.
#[derive(Clone)]
pub struct Agent {
    parts: Arc<AgentParts>,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("config", &self.parts.config)
            .field("restore", &self.parts.restore)
            .finish_non_exhaustive()
    }
}

impl Agent {
    /// Start building an agent around `root`.
    pub fn builder(root: Element, model: impl ModelAdapter + 'static) -> AgentBuilder {
        AgentBuilder {
            root,
            model: Arc::new(model),
            formatter: Arc::new(DefaultFormatter),
            tools: None,
            store: None,
            config: SessionConfig::from_settings(&get_settings().runtime),
            restore: RestoreOptions::default(),
        }
    }

    /// Limits applied to sessions.
    pub fn config(&self) -> &SessionConfig {
        &self.parts.config
    }

    /// Snapshot store.
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.parts.store
    }

    /// Fresh session with a generated id.
    pub fn create(&self) -> Session {
        self.create_with_id(SessionId::new())
    }

    /// Fresh session with the given id. Any stored snapshot is ignored.
    pub fn create_with_id(&self, id: SessionId) -> Session {
        Session::start(Arc::clone(&self.parts), id)
    }

    /// Session restored from the stored snapshot for `id`, or fresh when
    /// there is none, it cannot be loaded, or `before_restore` vetoes it.
    pub async fn open(&self, id: SessionId) -> Result<Session, RuntimeError> {
        Session::open(Arc::clone(&self.parts), id).await
    }
}

/// Builder for [`Agent`].
pub struct AgentBuilder {
    root: Element,
    model: Arc<dyn ModelAdapter>,
    formatter: Arc<dyn Formatter>,
    tools: Option<Arc<dyn ToolExecutor>>,
    store: Option<Arc<dyn SessionStore>>,
    config: SessionConfig,
    restore: RestoreOptions,
}

impl fmt::Debug for AgentBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentBuilder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AgentBuilder {
    /// Replace the formatter.
    #[must_use]
    pub fn formatter(mut self, formatter: impl Formatter + 'static) -> Self {
        self.formatter = Arc::new(formatter);
        self
    }

    /// Executor for non-control tool calls.
    #[must_use]
    pub fn tools(mut self, tools: impl ToolExecutor + 'static) -> Self {
        self.tools = Some(Arc::new(tools));
        self
    }

    /// Snapshot store. Defaults to an in-memory store.
    #[must_use]
    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Limits.
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Veto restores.
    #[must_use]
    pub fn before_restore(mut self, f: impl Fn(&SessionSnapshot) -> bool + Send + Sync + 'static) -> Self {
        self.restore.before_restore = Some(Arc::new(f));
        self
    }

    /// Observe completed restores.
    #[must_use]
    pub fn after_restore(mut self, f: impl Fn(&SessionSnapshot) -> anyhow::Result<()> + Send + Sync + 'static) -> Self {
        self.restore.after_restore = Some(Arc::new(f));
        self
    }

    /// Compute shared key `key` on restore instead of taking stored shared
    /// state. Once any resolver is set, no stored shared state is applied.
    #[must_use]
    pub fn resolve(
        mut self,
        key: impl Into<String>,
        f: impl Fn(&SessionSnapshot) -> anyhow::Result<Value> + Send + Sync + 'static,
    ) -> Self {
        let _ = self.restore.resolve.insert(key.into(), Arc::new(f));
        self
    }

    /// Observe snapshot save failures.
    #[must_use]
    pub fn on_persist_error(mut self, f: impl Fn(&StoreError) + Send + Sync + 'static) -> Self {
        self.restore.on_persist_error = Some(Arc::new(f));
        self
    }

    /// Finish.
    pub fn build(self) -> Agent {
        Agent {
            parts: Arc::new(AgentParts {
                root: self.root,
                model: self.model,
                formatter: self.formatter,
                tools: self.tools,
                store: self
                    .store
                    .unwrap_or_else(|| Arc::new(MemorySessionStore::new())),
                config: self.config,
                restore: self.restore,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_settings() {
        let settings = RuntimeSettings {
            max_ticks: 7,
            fetch_timeout_ms: 250,
            max_timeline_entries: Some(4),
            ..RuntimeSettings::default()
        };
        let cfg = SessionConfig::from_settings(&settings);
        assert_eq!(cfg.max_ticks, 7);
        assert_eq!(cfg.fetch_timeout, Duration::from_millis(250));
        assert_eq!(cfg.max_timeline_entries, Some(4));
        assert_eq!(SessionConfig::default().max_ticks, 100);
    }
}
