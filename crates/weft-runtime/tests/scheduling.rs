//! Background reconciliation: coalescing and effect follow-ups.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use weft_runtime::mock::ScriptedModel;
use weft_runtime::{Agent, Element, SessionEvent, Setter, Trigger, component_fn, deps};

type Slot = Arc<Mutex<Option<Setter<i64>>>>;

fn counter(slot: &Slot) -> Element {
    let slot = Arc::clone(slot);
    Element::component(
        component_fn(move |_, cx| {
            let (n, set) = cx.use_state(|| 0i64)?;
            *slot.lock() = Some(set);
            Ok(Element::text(format!("count: {n}")))
        }),
        json!({}),
    )
}

#[tokio::test]
async fn write_burst_coalesces_into_one_pass() {
    let slot: Slot = Arc::default();
    let session = Agent::builder(counter(&slot), ScriptedModel::default()).build().create();
    let _ = session.render(json!({})).await.unwrap();
    let before = session.pass_count();
    let mut events = session.subscribe();

    let set = slot.lock().clone().unwrap();
    for i in 0..100 {
        set.set(i);
    }
    session.settle().await;

    assert_eq!(session.last_output().await.text_content(), "count: 99");
    let passes = session.pass_count() - before;
    assert!((1..=2).contains(&passes), "{passes} passes");

    let mut implicit = 0;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Reconcile { trigger, .. } = event {
            assert_eq!(trigger, Trigger::Implicit);
            implicit += 1;
        }
    }
    assert_eq!(implicit, passes);
}

#[tokio::test]
async fn effect_writes_schedule_a_follow_up() {
    let root = Element::component(
        component_fn(|_, cx| {
            let (loaded, set) = cx.use_state(|| false)?;
            cx.use_effect(deps![], move || set.set(true))?;
            Ok(Element::text(if loaded { "loaded" } else { "loading" }))
        }),
        json!({}),
    );
    let session = Agent::builder(root, ScriptedModel::default()).build().create();

    let first = session.render(json!({})).await.unwrap();
    assert_eq!(first.text_content(), "loading");
    session.settle().await;

    assert_eq!(session.last_output().await.text_content(), "loaded");
    assert_eq!(session.pass_count(), 2);
}

#[tokio::test]
async fn explicit_render_supersedes_queued_work() {
    let slot: Slot = Arc::default();
    let session = Agent::builder(counter(&slot), ScriptedModel::default()).build().create();
    let _ = session.render(json!({})).await.unwrap();

    slot.lock().clone().unwrap().set(5);
    let output = session.render(json!({})).await.unwrap();
    assert_eq!(output.text_content(), "count: 5");
    session.settle().await;

    // The queued implicit pass was dropped by the explicit one.
    assert_eq!(session.pass_count(), 2);
}

#[tokio::test]
async fn writes_after_close_are_ignored() {
    let slot: Slot = Arc::default();
    let session = Agent::builder(counter(&slot), ScriptedModel::default()).build().create();
    let _ = session.render(json!({})).await.unwrap();
    session.close().await;

    slot.lock().clone().unwrap().set(1);
    session.settle().await;
    assert_eq!(session.pass_count(), 1);
}
