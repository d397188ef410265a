//! Gates: persisted conditions that keep the loop running.
//!
//! A gate starts `inactive`. At tick end an inactive gate whose predicate
//! holds becomes `active`. While active its instructions are shown to the
//! model and the execution cannot stop. The model (or code) may `defer` an
//! active gate, which hides it until the execution is about to stop, at
//! which point it comes back as active. `clear` returns any gate to
//! inactive.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use weft_core::TimelineEntry;

use crate::controls::Control;
use crate::errors::{Interrupt, ProgrammingError};
use crate::hooks::{HookContext, Shared, SharedOptions};
use crate::model::ModelOutput;
use crate::session::continuation::Continuation;
use crate::tree::evaluator::Registration;

/// Persisted gate state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    /// Not engaged.
    #[default]
    Inactive,
    /// Engaged and visible.
    Active,
    /// Engaged, hidden until the execution tries to stop.
    Deferred,
}

impl GateState {
    /// Whether the gate holds the loop open.
    pub fn is_engaged(self) -> bool {
        !matches!(self, Self::Inactive)
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Active => "active",
            Self::Deferred => "deferred",
        }
    }
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a gate predicate sees at tick end.
#[derive(Debug)]
pub struct GateContext<'a> {
    /// Tick that just finished.
    pub tick: u64,
    /// Timeline including this tick.
    pub timeline: &'a [TimelineEntry],
    /// The model's reply.
    pub output: &'a ModelOutput,
}

/// Activation predicate.
pub type GatePredicate = Arc<dyn Fn(&GateContext<'_>) -> bool + Send + Sync>;

/// Declaration of a gate.
#[derive(Clone)]
pub struct GateSpec {
    /// Unique name.
    pub name: String,
    /// Instructions shown while active.
    pub instructions: String,
    /// Activation predicate. Without one the gate activates only through code.
    pub predicate: Option<GatePredicate>,
}

impl fmt::Debug for GateSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateSpec")
            .field("name", &self.name)
            .field("instructions", &self.instructions)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl GateSpec {
    /// Gate without a predicate.
    pub fn new(name: impl Into<String>, instructions: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            predicate: None,
        }
    }

    /// Activate when `predicate` holds at tick end.
    #[must_use]
    pub fn activate_when(mut self, predicate: impl Fn(&GateContext<'_>) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }
}

/// Handle to a registered gate.
#[derive(Clone, Debug)]
pub struct Gate {
    name: Arc<str>,
    state: Shared<GateState>,
}

impl Gate {
    pub(crate) fn from_parts(name: &str, state: Shared<GateState>) -> Self {
        Self {
            name: Arc::from(name),
            state,
        }
    }

    /// Gate name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> GateState {
        self.state.get()
    }

    /// Whether the gate holds the loop open.
    pub fn is_engaged(&self) -> bool {
        self.state.get_untracked().is_engaged()
    }

    /// Active → deferred. Returns whether the state changed.
    pub fn defer(&self) -> bool {
        self.transition(GateState::Deferred, |s| s == GateState::Active)
    }

    /// Any → inactive. Returns whether the state changed.
    pub fn clear(&self) -> bool {
        self.transition(GateState::Inactive, |s| s != GateState::Inactive)
    }

    /// Inactive or deferred → active. Returns whether the state changed.
    pub(crate) fn activate(&self) -> bool {
        self.transition(GateState::Active, |s| s != GateState::Active)
    }

    fn transition(&self, to: GateState, allowed: impl FnOnce(GateState) -> bool) -> bool {
        let from = self.state.get_untracked();
        if !allowed(from) {
            return false;
        }
        debug!(gate = %self.name, %from, %to, "gate transition");
        self.state.set(to);
        true
    }
}

/// A registered gate: declaration plus handle.
#[derive(Clone, Debug)]
pub(crate) struct GateControl {
    pub(crate) spec: GateSpec,
    pub(crate) gate: Gate,
}

/// Apply tick-end gate rules to `decision`.
pub(crate) fn apply_gates<'a>(
    gates: impl Iterator<Item = &'a GateControl>,
    cx: &GateContext<'_>,
    decision: Continuation,
) -> Continuation {
    let mut engaged = Vec::new();
    let stopping = decision.is_stop();
    for control in gates {
        let gate = &control.gate;
        let state = gate.state.get_untracked();
        match state {
            GateState::Inactive => {
                if control.spec.predicate.as_ref().is_some_and(|p| p(cx)) {
                    info!(gate = gate.name(), "gate activated");
                    let _ = gate.activate();
                    engaged.push(gate.name().to_owned());
                }
            }
            GateState::Deferred if stopping => {
                info!(gate = gate.name(), "deferred gate resumed");
                let _ = gate.activate();
                engaged.push(gate.name().to_owned());
            }
            GateState::Active => engaged.push(gate.name().to_owned()),
            GateState::Deferred => {}
        }
    }
    if engaged.is_empty() || !stopping {
        return decision;
    }
    Continuation::Continue {
        reason: format!("gate engaged: {}", engaged.join(", ")),
    }
}

impl HookContext<'_> {
    /// Register a gate. Names must be unique within the tree.
    pub fn use_gate(&mut self, spec: GateSpec) -> Result<Gate, Interrupt> {
        let (slot, _) = self.custom_slot(|| (), None)?;
        let key = format!("gate:{}", spec.name);
        let state = self.use_shared_with(&key, SharedOptions { persist: true }, GateState::default)?;
        let owner = self.owner(slot);
        if self.frame().control_named(&spec.name).is_some_and(|o| o != owner) {
            return Err(ProgrammingError::DuplicateControl(spec.name).into());
        }
        let gate = Gate::from_parts(&spec.name, state);
        self.frame().registrations.push(Registration::Control(
            owner,
            Control::Gate(GateControl {
                spec,
                gate: gate.clone(),
            }),
        ));
        Ok(gate)
    }
}
