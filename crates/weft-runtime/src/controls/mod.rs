//! Model-visible controls: gates and knobs.
//!
//! After every committed pass the session appends a "Controls" section
//! describing registered knobs and active gates, plus the `set_knob` and
//! `set_gate` tools. Calls to those tools are handled here and never reach
//! the tool executor.

pub mod gate;
pub mod knob;

pub use gate::{Gate, GateContext, GatePredicate, GateSpec, GateState};
pub use knob::{Knob, KnobSpec};

use serde::Deserialize;
use serde_json::{Value, json};
use weft_core::ToolCall;

use crate::tree::{HostKind, OutputNode};
use gate::GateControl;

/// Tool the model calls to change a knob.
pub const SET_KNOB_TOOL: &str = "set_knob";
/// Tool the model calls to defer or clear a gate.
pub const SET_GATE_TOOL: &str = "set_gate";
/// Title of the synthesized section.
pub const CONTROLS_SECTION: &str = "Controls";

/// A registered control.
#[derive(Clone, Debug)]
pub(crate) enum Control {
    Gate(GateControl),
    Knob(Knob),
}

impl Control {
    pub(crate) fn name(&self) -> &str {
        match self {
            Self::Gate(g) => g.gate.name(),
            Self::Knob(k) => k.name(),
        }
    }
}

/// Section plus tools describing `controls`, in registration order.
/// Empty when nothing is registered.
pub(crate) fn render<'a>(controls: impl Iterator<Item = &'a Control>) -> Vec<OutputNode> {
    let mut knob_lines = Vec::new();
    let mut gate_lines = Vec::new();
    let mut any_gate = false;
    for control in controls {
        match control {
            Control::Knob(k) => {
                let spec = k.spec();
                let mut line = format!("- {} = {}: {}", spec.name, k.value_untracked(), spec.description);
                if let Some(allowed) = &spec.allowed {
                    line.push_str(&format!(" (allowed: {})", Value::Array(allowed.clone())));
                }
                knob_lines.push(OutputNode::text(line));
            }
            Control::Gate(g) => {
                any_gate = true;
                if g.gate.state() == GateState::Active {
                    gate_lines.push(OutputNode::text(format!("- {}: {}", g.spec.name, g.spec.instructions)));
                }
            }
        }
    }

    let mut nodes = Vec::new();
    let has_knobs = !knob_lines.is_empty();
    if !has_knobs && !any_gate {
        return nodes;
    }
    let mut children = Vec::new();
    if has_knobs {
        children.push(OutputNode::host(
            HostKind::Section,
            None,
            json!({ "title": "Knobs" }),
            knob_lines,
        ));
    }
    if !gate_lines.is_empty() {
        children.push(OutputNode::host(
            HostKind::Section,
            None,
            json!({ "title": "Active gates" }),
            gate_lines,
        ));
    }
    if !children.is_empty() {
        nodes.push(OutputNode::host(
            HostKind::Section,
            Some(CONTROLS_SECTION.to_owned()),
            json!({ "title": CONTROLS_SECTION }),
            children,
        ));
    }
    if has_knobs {
        nodes.push(tool_node(
            SET_KNOB_TOOL,
            "Set a knob to a new value.",
            json!({
                "type": "object",
                "properties": { "name": { "type": "string" }, "value": {} },
                "required": ["name", "value"]
            }),
        ));
    }
    if any_gate {
        nodes.push(tool_node(
            SET_GATE_TOOL,
            "Defer an active gate until the task would otherwise end, or clear it.",
            json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "state": { "type": "string", "enum": ["deferred", "inactive"] }
                },
                "required": ["name", "state"]
            }),
        ));
    }
    nodes
}

fn tool_node(name: &str, description: &str, parameters: Value) -> OutputNode {
    OutputNode::host(
        HostKind::Tool,
        Some(name.to_owned()),
        json!({ "name": name, "description": description, "parameters": parameters }),
        Vec::new(),
    )
}

#[derive(Deserialize)]
struct SetKnob {
    name: String,
    value: Value,
}

#[derive(Deserialize)]
struct SetGate {
    name: String,
    state: GateState,
}

/// Handle a control tool call. `None` when `call` is not a control tool.
pub(crate) fn handle_call<'a>(
    controls: impl Iterator<Item = &'a Control>,
    call: &ToolCall,
) -> Option<Result<Value, String>> {
    match call.name.as_str() {
        SET_KNOB_TOOL => Some(set_knob(controls, &call.arguments)),
        SET_GATE_TOOL => Some(set_gate(controls, &call.arguments)),
        _ => None,
    }
}

fn set_knob<'a>(mut controls: impl Iterator<Item = &'a Control>, args: &Value) -> Result<Value, String> {
    let args: SetKnob = serde_json::from_value(args.clone()).map_err(|e| format!("invalid arguments: {e}"))?;
    let knob = controls
        .find_map(|c| match c {
            Control::Knob(k) if k.name() == args.name => Some(k),
            _ => None,
        })
        .ok_or_else(|| format!("unknown knob: {}", args.name))?;
    knob.set(args.value.clone())?;
    Ok(json!({ "name": args.name, "value": args.value }))
}

fn set_gate<'a>(mut controls: impl Iterator<Item = &'a Control>, args: &Value) -> Result<Value, String> {
    let args: SetGate = serde_json::from_value(args.clone()).map_err(|e| format!("invalid arguments: {e}"))?;
    let gate = controls
        .find_map(|c| match c {
            Control::Gate(g) if g.gate.name() == args.name => Some(&g.gate),
            _ => None,
        })
        .ok_or_else(|| format!("unknown gate: {}", args.name))?;
    let changed = match args.state {
        GateState::Deferred => {
            if gate.state() != GateState::Active {
                return Err(format!("gate {} is {}; only an active gate can be deferred", args.name, gate.state()));
            }
            gate.defer()
        }
        GateState::Inactive => gate.clear(),
        GateState::Active => return Err("gates cannot be activated by tool call".to_owned()),
    };
    Ok(json!({ "name": args.name, "state": gate.state(), "changed": changed }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::Shared;
    use crate::store::{RuntimeStore, SharedValue};
    use weft_core::SessionId;
    use weft_reactive::ReactiveRuntime;

    fn controls(store: &mut RuntimeStore) -> Vec<Control> {
        let knob_cell = store.insert_shared("knob:tone", SharedValue::typed(json!("neutral")), true);
        let spec = KnobSpec::new("tone", "Reply tone", json!("neutral")).allowed(vec![json!("neutral"), json!("formal")]);
        let knob = Knob::from_parts(spec, Shared::from_parts("knob:tone", knob_cell, json!("neutral")));

        let gate_cell = store.insert_shared("gate:review", SharedValue::typed(GateState::Active), true);
        let gate = GateControl {
            spec: GateSpec::new("review", "Review the diff before finishing."),
            gate: Gate::from_parts("review", Shared::from_parts("gate:review", gate_cell, GateState::Inactive)),
        };
        vec![Control::Knob(knob), Control::Gate(gate)]
    }

    #[test]
    fn renders_section_and_tools() {
        let mut store = RuntimeStore::new(SessionId::from("c"), ReactiveRuntime::new());
        let controls = controls(&mut store);
        let nodes = render(controls.iter());
        assert_eq!(nodes.len(), 3);
        let text = nodes[0].text_content();
        assert!(text.contains("tone = \"neutral\""));
        assert!(text.contains("Review the diff"));
        assert_eq!(nodes[1].prop_str("name"), Some(SET_KNOB_TOOL));
        assert_eq!(nodes[2].prop_str("name"), Some(SET_GATE_TOOL));
    }

    #[test]
    fn deferred_gate_renders_no_instructions() {
        let mut store = RuntimeStore::new(SessionId::from("c"), ReactiveRuntime::new());
        let controls = controls(&mut store);
        let call = ToolCall::new(SET_GATE_TOOL, json!({"name": "review", "state": "deferred"}));
        assert!(handle_call(controls.iter(), &call).unwrap().is_ok());
        let text = render(controls.iter())[0].text_content();
        assert!(!text.contains("Review the diff"));
    }

    #[test]
    fn tool_calls_validate() {
        let mut store = RuntimeStore::new(SessionId::from("c"), ReactiveRuntime::new());
        let controls = controls(&mut store);

        let ok = ToolCall::new(SET_KNOB_TOOL, json!({"name": "tone", "value": "formal"}));
        assert!(handle_call(controls.iter(), &ok).unwrap().is_ok());
        assert_eq!(store.shared_json("knob:tone"), Some(json!("formal")));

        let bad = ToolCall::new(SET_KNOB_TOOL, json!({"name": "tone", "value": "loud"}));
        assert!(handle_call(controls.iter(), &bad).unwrap().is_err());

        let unknown = ToolCall::new(SET_GATE_TOOL, json!({"name": "nope", "state": "inactive"}));
        assert!(handle_call(controls.iter(), &unknown).unwrap().unwrap_err().contains("unknown gate"));

        let other = ToolCall::new("search", json!({}));
        assert!(handle_call(controls.iter(), &other).is_none());
    }
}
