//! File-backed store behavior across reopen.

use std::collections::BTreeMap;

use serde_json::json;
use weft_core::settings::{PersistenceSettings, StoreBackend};
use weft_core::{SessionId, TimelineEntry};
use weft_store::{CachedData, SessionSnapshot, SessionStore, SqliteSessionStore, from_settings};

fn snapshot(id: &SessionId) -> SessionSnapshot {
    let mut snap = SessionSnapshot::new(id.clone());
    snap.tick = 2;
    snap.timeline = Some(vec![
        TimelineEntry::user(1, "hello"),
        TimelineEntry::assistant(1, "hi", Vec::new()),
    ]);
    snap.shared_state = BTreeMap::from([
        ("profile".to_string(), json!({"name": "ada", "tags": ["a", "b"]})),
        ("count".to_string(), json!(3)),
    ]);
    let _ = snap.data_cache.insert(
        "weather".into(),
        CachedData {
            value: json!({"temp": 21.5}),
            tick: 1,
            deps: vec![json!("paris")],
        },
    );
    snap
}

#[tokio::test]
async fn survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessions.db");
    let id = SessionId::new();
    let snap = snapshot(&id);

    {
        let store = SqliteSessionStore::open(&path).unwrap();
        store.save(&snap).await.unwrap();
    }

    let store = SqliteSessionStore::open(&path).unwrap();
    assert!(store.has(&id).await.unwrap());
    let loaded = store.load(&id).await.unwrap().unwrap();
    assert_eq!(loaded.shared_state, snap.shared_state);
    assert_eq!(loaded.data_cache, snap.data_cache);
    assert_eq!(loaded.timeline, snap.timeline);
}

#[tokio::test]
async fn list_orders_most_recent_first() {
    let store = SqliteSessionStore::in_memory().unwrap();
    let first = SessionId::new();
    let second = SessionId::new();
    store.save(&snapshot(&first)).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    store.save(&snapshot(&second)).await.unwrap();

    let list = store.list().await.unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].session_id, second);
    assert_eq!(list[1].session_id, first);
}

#[tokio::test]
async fn settings_select_backend() {
    let dir = tempfile::tempdir().unwrap();
    let settings = PersistenceSettings {
        backend: StoreBackend::Sqlite,
        sqlite_path: dir.path().join("s.db").to_string_lossy().into_owned(),
    };
    let store = from_settings(&settings).unwrap();
    let id = SessionId::new();
    store.save(&snapshot(&id)).await.unwrap();
    assert!(dir.path().join("s.db").exists());

    let memory = from_settings(&PersistenceSettings::default()).unwrap();
    assert!(!memory.has(&id).await.unwrap());
}
