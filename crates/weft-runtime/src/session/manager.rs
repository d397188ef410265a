//! Session manager: tracks live sessions of one agent.

use dashmap::DashMap;
use tracing::{debug, instrument};
use weft_core::SessionId;
use weft_store::SnapshotSummary;

use crate::errors::RuntimeError;
use crate::session::agent::Agent;
use crate::session::handle::Session;

/// Live sessions keyed by id, backed by the agent's snapshot store.
#[derive(Debug)]
pub struct SessionManager {
    agent: Agent,
    active: DashMap<SessionId, Session>,
}

impl SessionManager {
    /// Manage sessions of `agent`.
    pub fn new(agent: Agent) -> Self {
        Self {
            agent,
            active: DashMap::new(),
        }
    }

    /// The managed agent.
    pub fn agent(&self) -> &Agent {
        &self.agent
    }

    /// Start a fresh session.
    #[instrument(skip(self))]
    pub fn create(&self) -> Session {
        let session = self.agent.create();
        let _ = self.active.insert(session.id().clone(), session.clone());
        debug!(session_id = %session.id(), "session created");
        session
    }

    /// The live session for `id`, else one restored from the store.
    #[instrument(skip(self), fields(session_id = %id))]
    pub async fn open(&self, id: &SessionId) -> Result<Session, RuntimeError> {
        if let Some(existing) = self.active.get(id) {
            return Ok(existing.clone());
        }
        let opened = self.agent.open(id.clone()).await?;
        let session = self
            .active
            .entry(id.clone())
            .or_insert_with(|| opened.clone())
            .clone();
        if !session.ptr_eq(&opened) {
            // Lost a race with a concurrent open; keep the first.
            opened.close().await;
        }
        debug!("session opened");
        Ok(session)
    }

    /// Close and forget a live session. Returns whether it was live.
    pub async fn close(&self, id: &SessionId) -> bool {
        match self.active.remove(id) {
            Some((_, session)) => {
                session.close().await;
                true
            }
            None => false,
        }
    }

    /// Close the session if live and delete its snapshot.
    pub async fn delete(&self, id: &SessionId) -> Result<bool, RuntimeError> {
        let _ = self.close(id).await;
        Ok(self.agent.store().delete(id).await?)
    }

    /// Stored snapshots.
    pub async fn list(&self) -> Result<Vec<SnapshotSummary>, RuntimeError> {
        Ok(self.agent.store().list().await?)
    }

    /// Whether `id` is live.
    pub fn is_active(&self, id: &SessionId) -> bool {
        self.active.contains_key(id)
    }

    /// Number of live sessions.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Close every live session.
    pub async fn shutdown(&self) {
        let ids: Vec<SessionId> = self.active.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            let _ = self.close(&id).await;
        }
    }
}
