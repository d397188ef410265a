//! Async data, snapshots, restore and the session manager.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_json::json;
use weft_core::SessionId;
use weft_runtime::mock::ScriptedModel;
use weft_runtime::{
    Agent, AsyncOptions, Element, Interrupt, Loadable, ModelOutput, RuntimeError, SessionConfig, SessionEvent,
    SessionManager, SharedOptions, component_fn, deps,
};
use weft_store::{MemorySessionStore, SessionSnapshot, SessionStore, SnapshotSummary, StoreError};

fn counting_profile(fetches: &Arc<AtomicUsize>) -> Element {
    let counter = Arc::clone(fetches);
    Element::component(
        component_fn(move |props, cx| {
            let id = props["id"].as_u64().unwrap_or(1);
            let counter = Arc::clone(&counter);
            let name: String = cx
                .use_async("profile", deps![id], move || async move {
                    let _ = counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok(format!("user-{id}"))
                })?
                .ready()?;
            Ok(Element::text(format!("name: {name}")))
        }),
        json!({"id": 1}),
    )
}

#[tokio::test]
async fn suspension_resumes_without_refetching() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let session = Agent::builder(counting_profile(&fetches), ScriptedModel::default())
        .build()
        .create();
    let mut events = session.subscribe();

    let output = session.render(json!({"id": 1})).await.unwrap();
    assert_eq!(output.text_content(), "name: user-1");
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    let mut reasons = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Reconcile { reason, .. } = event {
            reasons.push(reason);
        }
    }
    assert_eq!(reasons, ["render", "resumed after profile"]);

    let output = session.render(json!({"id": 1})).await.unwrap();
    assert_eq!(output.text_content(), "name: user-1");
    assert_eq!(fetches.load(Ordering::SeqCst), 1);

    let output = session.render(json!({"id": 2})).await.unwrap();
    assert_eq!(output.text_content(), "name: user-2");
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn fetch_error_is_a_failed_loadable() {
    let root = Element::component(
        component_fn(|_, cx| {
            let text = match cx.use_async("quota", deps![], || async {
                Err::<u32, _>(anyhow::anyhow!("backend down"))
            })? {
                Loadable::Ready(n) => format!("quota: {n}"),
                Loadable::Failed { message, .. } => format!("quota unavailable: {message}"),
                Loadable::Pending { key } => return Err(Interrupt::Suspended { key }),
            };
            Ok(Element::text(text))
        }),
        json!({}),
    );
    let session = Agent::builder(root, ScriptedModel::default()).build().create();

    let output = session.render(json!({})).await.unwrap();
    assert_eq!(output.text_content(), "quota unavailable: backend down");
}

#[tokio::test]
async fn slow_fetch_times_out() {
    let root = Element::component(
        component_fn(|_, cx| {
            let v: u32 = cx
                .use_async("slow", deps![], || async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    anyhow::Ok(1u32)
                })?
                .ready()?;
            Ok(Element::text(v.to_string()))
        }),
        json!({}),
    );
    let config = SessionConfig {
        fetch_timeout: Duration::from_millis(20),
        ..SessionConfig::default()
    };
    let session = Agent::builder(root, ScriptedModel::default()).config(config).build().create();

    assert_matches!(
        session.render(json!({})).await,
        Err(RuntimeError::Fetch { key, .. }) if key == "slow"
    );
}

#[tokio::test]
async fn chained_fetches_respect_the_suspension_limit() {
    let root = Element::component(
        component_fn(|_, cx| {
            let user: String = cx
                .use_async("user", deps![], || async { anyhow::Ok("ada".to_owned()) })?
                .ready()?;
            let team: String = cx
                .use_async("team", deps![user], move || async move { anyhow::Ok(format!("{user}'s team")) })?
                .ready()?;
            Ok(Element::text(team))
        }),
        json!({}),
    );

    let tight = SessionConfig {
        max_suspensions: 1,
        ..SessionConfig::default()
    };
    let session = Agent::builder(root.clone(), ScriptedModel::default())
        .config(tight)
        .build()
        .create();
    assert_matches!(session.render(json!({})).await, Err(RuntimeError::SuspensionLimit(1)));

    let session = Agent::builder(root, ScriptedModel::default()).build().create();
    let output = session.render(json!({})).await.unwrap();
    assert_eq!(output.text_content(), "ada's team");
}

fn journal(fetches: &Arc<AtomicUsize>) -> Element {
    let counter = Arc::clone(fetches);
    Element::component(
        component_fn(move |_, cx| {
            let notes = cx.use_shared("notes", Vec::<String>::new)?;
            let scratch = cx.use_shared_with("scratch", SharedOptions { persist: false }, || 0u32)?;
            let counter = Arc::clone(&counter);
            let weather: String = cx
                .use_async_with("weather", deps!["oslo"], AsyncOptions::persisted(), move || async move {
                    let _ = counter.fetch_add(1, Ordering::SeqCst);
                    anyhow::Ok("rain".to_owned())
                })?
                .ready()?;
            let log = notes.clone();
            cx.use_tick_end(move |end| {
                log.update(|n| n.push(format!("tick {}", end.tick())));
                Ok(())
            })?;
            Ok(Element::text(format!(
                "notes={} scratch={} weather={weather}",
                notes.get().len(),
                scratch.get()
            )))
        }),
        json!({}),
    )
}

#[tokio::test]
async fn snapshot_survives_close_and_reopen() {
    let fetches = Arc::new(AtomicUsize::new(0));
    let store = Arc::new(MemorySessionStore::new());
    let model = ScriptedModel::default().with_fallback(ModelOutput::text("ok"));
    let agent = Agent::builder(journal(&fetches), model.clone())
        .store(store.clone())
        .build();

    let first = agent.create();
    assert_eq!(first.restored_tick(), None);
    let id = first.id().clone();
    let _ = first.send("hello").await.unwrap();
    first.set_shared("scratch", json!(7)).await.unwrap();
    first.persist().await;

    let snap = first.snapshot().await;
    assert_eq!(snap.tick, 1);
    assert_eq!(snap.shared_state.get("notes"), Some(&json!(["tick 1"])));
    assert!(!snap.shared_state.contains_key("scratch"));
    assert_eq!(snap.data_cache["weather"].value, json!("rain"));
    let round_trip = SessionSnapshot::from_json(&snap.to_json().unwrap()).unwrap();
    assert_eq!(round_trip.shared_state, snap.shared_state);
    assert_eq!(round_trip.data_cache, snap.data_cache);
    first.close().await;

    let second = agent.open(id).await.unwrap();
    assert_eq!(second.restored_tick(), Some(1));
    assert_eq!(second.tick().await, 1);
    assert_eq!(second.timeline().await.len(), 2);
    assert_eq!(second.shared_value("notes").await, Some(json!(["tick 1"])));
    assert_eq!(second.shared_value("scratch").await, None);

    let _ = second.send("again").await.unwrap();
    assert_eq!(second.tick().await, 2);
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert_eq!(second.shared_value("scratch").await, Some(json!(0)));
    let system = model.last_input().unwrap().system;
    assert!(system.contains("notes=1 scratch=0 weather=rain"), "{system}");
}

async fn seeded_store(id: &SessionId) -> Arc<MemorySessionStore> {
    let store = Arc::new(MemorySessionStore::new());
    let mut snap = SessionSnapshot::new(id.clone());
    snap.tick = 5;
    let _ = snap.shared_state.insert("notes".into(), json!(["old"]));
    let _ = snap.shared_state.insert("other".into(), json!(1));
    store.save(&snap).await.unwrap();
    store
}

#[tokio::test]
async fn resolvers_replace_stored_shared_state() {
    let id = SessionId::from("resolved");
    let restored = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&restored);
    let agent = Agent::builder(Element::text("static"), ScriptedModel::default())
        .store(seeded_store(&id).await)
        .resolve("notes", |snap| Ok(json!([format!("restored at {}", snap.tick)])))
        .after_restore(move |_| {
            let _ = seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .build();

    let session = agent.open(id).await.unwrap();
    assert_eq!(session.tick().await, 5);
    assert_eq!(session.restored_tick(), Some(5));
    assert_eq!(session.shared_value("notes").await, Some(json!(["restored at 5"])));
    assert_eq!(session.shared_value("other").await, None);
    assert_eq!(restored.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failing_resolver_rejects_open() {
    let id = SessionId::from("unresolvable");
    let agent = Agent::builder(Element::text("static"), ScriptedModel::default())
        .store(seeded_store(&id).await)
        .resolve("notes", |_| Err(anyhow::anyhow!("schema moved")))
        .build();

    assert_matches!(
        agent.open(id).await,
        Err(RuntimeError::Resolve { key, message }) if key == "notes" && message.contains("schema moved")
    );
}

#[tokio::test]
async fn vetoed_restore_starts_fresh() {
    let id = SessionId::from("vetoed");
    let agent = Agent::builder(Element::text("static"), ScriptedModel::default())
        .store(seeded_store(&id).await)
        .before_restore(|snap| snap.tick < 3)
        .build();

    let session = agent.open(id).await.unwrap();
    assert_eq!(session.tick().await, 0);
    assert_eq!(session.restored_tick(), None);
    assert_eq!(session.shared_value("notes").await, None);
}

/// Store whose every operation fails.
struct BrokenStore;

#[async_trait]
impl SessionStore for BrokenStore {
    async fn save(&self, _: &SessionSnapshot) -> weft_store::Result<()> {
        Err(StoreError::Io("disk full".into()))
    }

    async fn load(&self, _: &SessionId) -> weft_store::Result<Option<SessionSnapshot>> {
        Err(StoreError::Io("unreadable".into()))
    }

    async fn delete(&self, _: &SessionId) -> weft_store::Result<bool> {
        Err(StoreError::Io("read-only".into()))
    }

    async fn list(&self) -> weft_store::Result<Vec<SnapshotSummary>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn store_failures_are_tolerated() {
    let reported = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&reported);
    let agent = Agent::builder(Element::text("static"), ScriptedModel::default().with_fallback(ModelOutput::text("ok")))
        .store(Arc::new(BrokenStore))
        .on_persist_error(move |_| {
            let _ = count.fetch_add(1, Ordering::SeqCst);
        })
        .build();

    // Load failure falls back to a fresh session.
    let session = agent.open(SessionId::from("broken")).await.unwrap();
    assert_eq!(session.tick().await, 0);
    assert_eq!(session.restored_tick(), None);

    let mut events = session.subscribe();
    let outcome = session.send("hi").await.unwrap();
    assert_eq!(outcome.result.as_deref(), Some("ok"));
    assert_eq!(reported.load(Ordering::SeqCst), 1);

    let mut failures = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::PersistFailed { message } = event {
            failures.push(message);
        }
    }
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("disk full"));
}

#[tokio::test]
async fn manager_tracks_live_sessions() {
    let store = Arc::new(MemorySessionStore::new());
    let agent = Agent::builder(Element::text("static"), ScriptedModel::default().with_fallback(ModelOutput::text("ok")))
        .store(store.clone())
        .build();
    let manager = SessionManager::new(agent);

    let session = manager.create();
    let id = session.id().clone();
    assert!(manager.is_active(&id));
    assert_eq!(manager.active_count(), 1);
    let _ = session.send("hi").await.unwrap();

    let again = manager.open(&id).await.unwrap();
    assert!(again.ptr_eq(&session));

    assert!(manager.close(&id).await);
    assert!(!manager.close(&id).await);
    assert!(session.is_closed());
    assert_eq!(manager.active_count(), 0);

    let listed = manager.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].tick, 1);

    let reopened = manager.open(&id).await.unwrap();
    assert!(!reopened.ptr_eq(&session));
    assert_eq!(reopened.tick().await, 1);

    assert!(manager.delete(&id).await.unwrap());
    assert!(!manager.is_active(&id));
    assert!(manager.list().await.unwrap().is_empty());
    assert_eq!(store.len(), 0);
}
