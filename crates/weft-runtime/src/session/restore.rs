//! Restore options and snapshot application.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};
use weft_store::{SessionSnapshot, StoreError};

use crate::errors::RuntimeError;
use crate::store::RuntimeStore;

/// Veto hook: return `false` to start fresh instead of restoring.
pub type BeforeRestoreFn = Arc<dyn Fn(&SessionSnapshot) -> bool + Send + Sync>;
/// Runs after a snapshot was applied.
pub type AfterRestoreFn = Arc<dyn Fn(&SessionSnapshot) -> anyhow::Result<()> + Send + Sync>;
/// Produces the value of one shared key from the snapshot.
pub type ResolveFn = Arc<dyn Fn(&SessionSnapshot) -> anyhow::Result<Value> + Send + Sync>;
/// Observes snapshot save failures.
pub type PersistErrorFn = Arc<dyn Fn(&StoreError) + Send + Sync>;

/// How a session treats stored snapshots.
#[derive(Clone, Default)]
pub struct RestoreOptions {
    pub(crate) before_restore: Option<BeforeRestoreFn>,
    pub(crate) after_restore: Option<AfterRestoreFn>,
    pub(crate) resolve: BTreeMap<String, ResolveFn>,
    pub(crate) on_persist_error: Option<PersistErrorFn>,
}

impl fmt::Debug for RestoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestoreOptions")
            .field("before_restore", &self.before_restore.is_some())
            .field("after_restore", &self.after_restore.is_some())
            .field("resolve", &self.resolve.keys().collect::<Vec<_>>())
            .field("on_persist_error", &self.on_persist_error.is_some())
            .finish()
    }
}

impl RestoreOptions {
    /// Whether the snapshot should be applied.
    pub(crate) fn allows(&self, snapshot: &SessionSnapshot) -> bool {
        self.before_restore.as_ref().is_none_or(|f| f(snapshot))
    }

    /// Apply `snapshot` to `store`.
    ///
    /// With a resolution map, the snapshot's shared state is skipped and each
    /// resolver's value is written instead; the first failing resolver
    /// aborts with [`RuntimeError::Resolve`].
    pub(crate) fn apply(&self, store: &mut RuntimeStore, snapshot: &SessionSnapshot) -> Result<(), RuntimeError> {
        let resolved = self.resolve_all(snapshot)?;
        store.apply_snapshot(snapshot, self.resolve.is_empty());
        for (key, value) in resolved {
            store.set_shared_json(&key, value);
        }
        info!(
            session_id = %snapshot.session_id,
            tick = snapshot.tick,
            shared = snapshot.shared_state.len(),
            cached = snapshot.data_cache.len(),
            "snapshot restored"
        );
        if let Some(after) = &self.after_restore
            && let Err(e) = after(snapshot)
        {
            warn!(error = %e, "after_restore callback failed");
        }
        Ok(())
    }

    fn resolve_all(&self, snapshot: &SessionSnapshot) -> Result<Vec<(String, Value)>, RuntimeError> {
        self.resolve
            .iter()
            .map(|(key, resolver)| {
                resolver(snapshot)
                    .map(|v| (key.clone(), v))
                    .map_err(|e| RuntimeError::Resolve {
                        key: key.clone(),
                        message: format!("{e:#}"),
                    })
            })
            .collect()
    }

    pub(crate) fn report_persist_error(&self, error: &StoreError) {
        if let Some(f) = &self.on_persist_error {
            f(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use weft_core::SessionId;
    use weft_reactive::ReactiveRuntime;

    fn snapshot() -> SessionSnapshot {
        let mut snap = SessionSnapshot::new(SessionId::from("r"));
        snap.tick = 3;
        let _ = snap.shared_state.insert("stored".into(), json!(1));
        snap
    }

    fn store() -> RuntimeStore {
        RuntimeStore::new(SessionId::from("r"), ReactiveRuntime::new())
    }

    #[test]
    fn plain_restore_applies_shared_state() {
        let mut s = store();
        RestoreOptions::default().apply(&mut s, &snapshot()).unwrap();
        assert_eq!(s.tick(), 3);
        assert_eq!(s.shared_json("stored"), Some(json!(1)));
    }

    #[test]
    fn resolution_map_replaces_shared_state() {
        let mut opts = RestoreOptions::default();
        let _ = opts.resolve.insert(
            "fresh".into(),
            Arc::new(|snap: &SessionSnapshot| Ok(json!(snap.tick * 10))) as ResolveFn,
        );
        let mut s = store();
        opts.apply(&mut s, &snapshot()).unwrap();
        assert_eq!(s.shared_json("stored"), None);
        assert_eq!(s.shared_json("fresh"), Some(json!(30)));
    }

    #[test]
    fn failing_resolver_names_key() {
        let mut opts = RestoreOptions::default();
        let _ = opts.resolve.insert(
            "bad".into(),
            Arc::new(|_: &SessionSnapshot| Err(anyhow::anyhow!("nope"))) as ResolveFn,
        );
        let mut s = store();
        assert_matches!(
            opts.apply(&mut s, &snapshot()),
            Err(RuntimeError::Resolve { key, .. }) if key == "bad"
        );
        assert_eq!(s.tick(), 0);
    }

    #[test]
    fn veto() {
        let opts = RestoreOptions {
            before_restore: Some(Arc::new(|snap: &SessionSnapshot| snap.tick < 2)),
            ..RestoreOptions::default()
        };
        assert!(!opts.allows(&snapshot()));
        assert!(RestoreOptions::default().allows(&snapshot()));
    }
}
