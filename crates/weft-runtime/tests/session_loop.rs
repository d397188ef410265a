//! Tick loop behaviour through the public session API.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use assert_matches::assert_matches;
use parking_lot::Mutex;
use serde_json::json;
use weft_core::Role;
use weft_reactive::Cleanup;
use weft_runtime::mock::{ScriptedModel, StaticTools};
use weft_runtime::{
    Agent, Element, EventKind, ExecutionStatus, GateSpec, KnobSpec, ModelOutput, ProgrammingError, RuntimeError,
    SessionConfig, SessionEvent, component_fn,
};

fn assistant() -> Element {
    Element::component(
        component_fn(|_, _cx| {
            Ok(Element::fragment(vec![
                Element::section("Role", vec![Element::text("You look things up.")]),
                Element::tool("lookup", "Look up a fact", json!({"type": "object"})),
            ]))
        }),
        json!({}),
    )
}

#[tokio::test]
async fn tool_calls_continue_until_plain_reply() {
    let model = ScriptedModel::new([
        ModelOutput::tool_call("lookup", json!({"q": "rust"})).with_usage(10, 2),
        ModelOutput::text("Rust is a language.").with_usage(12, 5),
    ]);
    let tools = StaticTools::new().with("lookup", json!("a systems language"));
    let agent = Agent::builder(assistant(), model.clone()).tools(tools.clone()).build();
    let session = agent.create();

    let outcome = session.send("what is rust?").await.unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Completed);
    assert_eq!(outcome.ticks, 2);
    assert_eq!(outcome.result.as_deref(), Some("Rust is a language."));

    let timeline = session.timeline().await;
    let roles: Vec<Role> = timeline.iter().map(|e| e.role).collect();
    assert_eq!(roles, [Role::User, Role::Assistant, Role::Tool, Role::Assistant]);
    assert_eq!(timeline[2].content, "a systems language");
    assert!(!timeline[2].is_error);
    assert_eq!(tools.calls().len(), 1);

    let first = &model.inputs()[0];
    assert!(first.system.contains("You look things up."));
    let names: Vec<&str> = first.tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, ["lookup"]);

    assert_eq!(session.tick().await, 2);
    let usage = session.usage().await;
    assert_eq!(usage.model_calls, 2);
    assert_eq!(usage.input_tokens, 22);
    assert_eq!(usage.ticks, 2);
}

#[tokio::test]
async fn unknown_tool_becomes_error_entry() {
    let model = ScriptedModel::new([ModelOutput::tool_call("missing", json!({})), ModelOutput::text("sorry")]);
    let session = Agent::builder(assistant(), model).build().create();

    let outcome = session.send("go").await.unwrap();
    assert_eq!(outcome.ticks, 2);
    let timeline = session.timeline().await;
    assert!(timeline[2].is_error);
    assert!(timeline[2].content.contains("unknown tool"));
}

#[tokio::test]
async fn engaged_gate_holds_loop_until_cleared() {
    let root = Element::component(
        component_fn(|_, cx| {
            let gate = cx.use_gate(
                GateSpec::new("review", "Check the answer before finishing.").activate_when(|g| g.tick == 1),
            )?;
            Ok(Element::text(format!("review gate: {}", gate.state())))
        }),
        json!({}),
    );
    let model = ScriptedModel::new([
        ModelOutput::text("draft"),
        ModelOutput::text("still drafting"),
        ModelOutput::tool_call("set_gate", json!({"name": "review", "state": "inactive"})),
        ModelOutput::text("final"),
    ]);
    let session = Agent::builder(root, model.clone()).build().create();

    let outcome = session.send("write it").await.unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Completed);
    assert_eq!(outcome.ticks, 4);
    assert_eq!(outcome.result.as_deref(), Some("final"));

    let inputs = model.inputs();
    assert!(!inputs[0].system.contains("Check the answer"));
    assert!(inputs[1].system.contains("Check the answer before finishing."));
    assert!(inputs[1].tools.iter().any(|t| t.name == "set_gate"));
    assert!(!inputs[3].system.contains("Check the answer"));
    assert_eq!(session.shared_value("gate:review").await, Some(json!("inactive")));
}

#[tokio::test]
async fn model_sets_knob_through_control_tool() {
    let root = Element::component(
        component_fn(|_, cx| {
            let tone = cx.use_knob(
                KnobSpec::new("tone", "Voice of replies", json!("neutral"))
                    .allowed(vec![json!("neutral"), json!("formal")]),
            )?;
            Ok(Element::text(format!("tone: {}", tone.value())))
        }),
        json!({}),
    );
    let model = ScriptedModel::new([
        ModelOutput::tool_call("set_knob", json!({"name": "tone", "value": "shouty"})),
        ModelOutput::tool_call("set_knob", json!({"name": "tone", "value": "formal"})),
        ModelOutput::text("done"),
    ]);
    let session = Agent::builder(root, model.clone()).build().create();

    let outcome = session.send("be formal").await.unwrap();
    assert_eq!(outcome.ticks, 3);
    let errors: Vec<bool> = session
        .timeline()
        .await
        .iter()
        .filter(|e| e.role == Role::Tool)
        .map(|e| e.is_error)
        .collect();
    assert_eq!(errors, [true, false]);
    assert_eq!(session.shared_value("knob:tone").await, Some(json!("formal")));
    assert!(model.inputs()[2].system.contains("tone = \"formal\""));
    assert!(model.inputs()[2].system.contains("tone: \"formal\""));
}

#[tokio::test]
async fn tick_end_callbacks_can_extend_the_loop() {
    let root = Element::component(
        component_fn(|_, cx| {
            cx.use_tick_end(|end| {
                if end.tick() < 3 {
                    end.request_continue("not yet");
                }
                Ok(())
            })?;
            Ok(Element::text("working"))
        }),
        json!({}),
    );
    let model = ScriptedModel::default().with_fallback(ModelOutput::text("ok"));
    let session = Agent::builder(root, model).build().create();
    let mut events = session.subscribe();

    let outcome = session.send("start").await.unwrap();
    assert_eq!(outcome.ticks, 3);
    assert_eq!(outcome.reason, "model replied without tool calls");

    let mut tick_ends = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::TickEnd { tick, decision } = event {
            tick_ends.push((tick, decision.is_stop()));
        }
    }
    assert_eq!(tick_ends, [(1, false), (2, false), (3, true)]);
}

#[tokio::test]
async fn tick_cap_ends_execution() {
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&statuses);
    let root = Element::component(
        component_fn(move |_, cx| {
            cx.use_tick_end(|end| {
                end.request_continue("forever");
                Ok(())
            })?;
            let seen = Arc::clone(&seen);
            cx.use_execution_end(move |end| {
                seen.lock().push(end.status);
                Ok(())
            })?;
            Ok(Element::text("loop"))
        }),
        json!({}),
    );
    let config = SessionConfig {
        max_ticks: 2,
        ..SessionConfig::default()
    };
    let model = ScriptedModel::default().with_fallback(ModelOutput::text("again"));
    let session = Agent::builder(root, model).config(config).build().create();

    let outcome = session.send("go").await.unwrap();
    assert_eq!(outcome.status, ExecutionStatus::MaxTicks);
    assert_eq!(outcome.ticks, 2);
    assert_eq!(*statuses.lock(), [ExecutionStatus::MaxTicks]);

    // The cap is per execution, not per session.
    let outcome = session.send("again").await.unwrap();
    assert_eq!(outcome.ticks, 2);
    assert_eq!(session.tick().await, 4);
}

#[tokio::test]
async fn callback_errors_do_not_stop_the_tick() {
    let root = Element::component(
        component_fn(|_, cx| {
            cx.use_tick_start(|_| anyhow::bail!("tick start broke"))?;
            cx.use_after_format(|input| {
                input.system.push_str("\nappended");
                Ok(())
            })?;
            Ok(Element::text("base"))
        }),
        json!({}),
    );
    let model = ScriptedModel::new([ModelOutput::text("fine")]);
    let session = Agent::builder(root, model.clone()).build().create();

    let outcome = session.send("hi").await.unwrap();
    assert_eq!(outcome.status, ExecutionStatus::Completed);
    assert!(model.inputs()[0].system.ends_with("\nappended"));
}

#[tokio::test]
async fn timeline_is_trimmed_to_most_recent_entries() {
    let config = SessionConfig {
        max_timeline_entries: Some(4),
        ..SessionConfig::default()
    };
    let model = ScriptedModel::default().with_fallback(ModelOutput::text("ack"));
    let session = Agent::builder(assistant(), model).config(config).build().create();

    for input in ["one", "two", "three"] {
        let _ = session.send(input).await.unwrap();
    }
    let timeline = session.timeline().await;
    assert_eq!(timeline.len(), 4);
    assert_eq!(timeline[0].content, "two");
    assert_eq!(timeline[0].tick, 2);
    assert_eq!(timeline[3].tick, 3);
}

#[tokio::test]
async fn queued_input_runs_another_tick() {
    let model = ScriptedModel::default().with_fallback(ModelOutput::text("ack"));
    let session = Agent::builder(assistant(), model).build().create();

    session.queue("first");
    let outcome = session.send("second").await.unwrap();
    assert_eq!(outcome.ticks, 1);
    let users: Vec<String> = session
        .timeline()
        .await
        .into_iter()
        .filter(|e| e.role == Role::User)
        .map(|e| e.content)
        .collect();
    assert_eq!(users, ["first", "second"]);
    assert_eq!(session.queued_len(), 0);
}

#[tokio::test]
async fn hook_order_change_surfaces_from_render() {
    let root = Element::component(
        component_fn(|props, cx| {
            let (n, _) = cx.use_state(|| 0u32)?;
            if props["extra"] == json!(true) {
                let _ = cx.use_ref(|| 0u8)?;
            }
            Ok(Element::text(n.to_string()))
        }),
        json!({}),
    );
    let session = Agent::builder(root, ScriptedModel::default()).build().create();

    let _ = session.render(json!({})).await.unwrap();
    assert_matches!(
        session.render(json!({"extra": true})).await,
        Err(RuntimeError::Programming(ProgrammingError::HookCountMismatch { .. }))
    );
}

#[tokio::test]
async fn model_failure_propagates() {
    let session = Agent::builder(assistant(), ScriptedModel::default()).build().create();
    assert_matches!(session.send("hi").await, Err(RuntimeError::Model(_)));
}

#[tokio::test]
async fn close_unmounts_and_rejects_further_work() {
    let cleaned = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cleaned);
    let root = Element::component(
        component_fn(move |_, cx| {
            let flag = Arc::clone(&flag);
            cx.use_effect(Vec::new(), move || Cleanup::new(move || flag.store(true, Ordering::SeqCst)))?;
            Ok(Element::text("mounted"))
        }),
        json!({}),
    );
    let session = Agent::builder(root, ScriptedModel::default()).build().create();
    let closed = Arc::new(AtomicBool::new(false));
    let c = Arc::clone(&closed);
    let _ = session.on(EventKind::Closed, move |_| c.store(true, Ordering::SeqCst));

    let _ = session.render(json!({})).await.unwrap();
    assert!(!cleaned.load(Ordering::SeqCst));

    session.close().await;
    assert!(cleaned.load(Ordering::SeqCst));
    assert!(closed.load(Ordering::SeqCst));
    assert!(session.is_closed());
    assert_matches!(session.send("late").await, Err(RuntimeError::SessionClosed));
    assert_matches!(session.render(json!({})).await, Err(RuntimeError::SessionClosed));

    // Idempotent.
    session.close().await;
}
