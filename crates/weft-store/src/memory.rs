//! Process-local session store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use weft_core::SessionId;

use crate::error::Result;
use crate::snapshot::{SessionSnapshot, SnapshotSummary};
use crate::store::SessionStore;

/// In-memory store. Snapshots are held as JSON text so every save and load
/// goes through the same encoding as a durable backend.
#[derive(Default)]
pub struct MemorySessionStore {
    snapshots: RwLock<HashMap<SessionId, String>>,
    saves: AtomicU64,
    loads: AtomicU64,
}

impl MemorySessionStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `save` calls so far.
    pub fn save_count(&self) -> u64 {
        self.saves.load(Ordering::Relaxed)
    }

    /// Number of `load` calls so far.
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Number of stored snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn save(&self, snapshot: &SessionSnapshot) -> Result<()> {
        let text = snapshot.to_json()?;
        let _ = self
            .snapshots
            .write()
            .insert(snapshot.session_id.clone(), text);
        let _ = self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn load(&self, id: &SessionId) -> Result<Option<SessionSnapshot>> {
        let _ = self.loads.fetch_add(1, Ordering::Relaxed);
        let text = self.snapshots.read().get(id).cloned();
        text.map(|t| SessionSnapshot::from_json(&t)).transpose()
    }

    async fn delete(&self, id: &SessionId) -> Result<bool> {
        Ok(self.snapshots.write().remove(id).is_some())
    }

    async fn list(&self) -> Result<Vec<SnapshotSummary>> {
        let texts: Vec<String> = self.snapshots.read().values().cloned().collect();
        let mut out = texts
            .iter()
            .map(|t| SessionSnapshot::from_json(t).map(|s| SnapshotSummary::from(&s)))
            .collect::<Result<Vec<_>>>()?;
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(out)
    }

    async fn has(&self, id: &SessionId) -> Result<bool> {
        Ok(self.snapshots.read().contains_key(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_load_delete() {
        let store = MemorySessionStore::new();
        let id = SessionId::new();
        let mut snap = SessionSnapshot::new(id.clone());
        snap.tick = 2;

        store.save(&snap).await.unwrap();
        assert!(store.has(&id).await.unwrap());
        assert_eq!(store.load(&id).await.unwrap(), Some(snap));
        assert!(store.delete(&id).await.unwrap());
        assert!(!store.delete(&id).await.unwrap());
        assert!(store.load(&id).await.unwrap().is_none());
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn save_replaces() {
        let store = MemorySessionStore::new();
        let id = SessionId::new();
        let mut snap = SessionSnapshot::new(id.clone());
        store.save(&snap).await.unwrap();
        snap.tick = 9;
        store.save(&snap).await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.list().await.unwrap()[0].tick, 9);
    }
}
