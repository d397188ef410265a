//! The persistence collaborator.

use async_trait::async_trait;
use weft_core::SessionId;

use crate::error::Result;
use crate::snapshot::{SessionSnapshot, SnapshotSummary};

/// Durable home for session snapshots.
///
/// Every call is fallible; callers in the runtime log failures and carry on
/// without durability for that cycle.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Write (or replace) the snapshot for `snapshot.session_id`.
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<()>;

    /// Read the snapshot for `id`, `None` when absent.
    async fn load(&self, id: &SessionId) -> Result<Option<SessionSnapshot>>;

    /// Remove the snapshot for `id`. Returns whether one existed.
    async fn delete(&self, id: &SessionId) -> Result<bool>;

    /// Summaries of every stored snapshot, most recent first.
    async fn list(&self) -> Result<Vec<SnapshotSummary>>;

    /// Whether a snapshot exists for `id`.
    async fn has(&self, id: &SessionId) -> Result<bool> {
        Ok(self.load(id).await?.is_some())
    }
}
