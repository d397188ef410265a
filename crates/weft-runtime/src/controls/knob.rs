//! Knobs: parameters the model can set through the `set_knob` tool.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use weft_core::json;

use crate::controls::Control;
use crate::errors::{Interrupt, ProgrammingError};
use crate::hooks::{HookContext, Shared, SharedOptions};
use crate::tree::evaluator::Registration;

/// Declaration of a knob.
#[derive(Clone, Debug, PartialEq)]
pub struct KnobSpec {
    /// Unique name.
    pub name: String,
    /// What the knob changes.
    pub description: String,
    /// Initial value.
    pub default: Value,
    /// Accepted values; any value when `None`.
    pub allowed: Option<Vec<Value>>,
}

impl KnobSpec {
    /// Knob accepting any value.
    pub fn new(name: impl Into<String>, description: impl Into<String>, default: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            default,
            allowed: None,
        }
    }

    /// Restrict accepted values.
    #[must_use]
    pub fn allowed(mut self, values: Vec<Value>) -> Self {
        self.allowed = Some(values);
        self
    }

    /// Check `value` against the allowed set.
    pub fn validate(&self, value: &Value) -> Result<(), String> {
        match &self.allowed {
            Some(allowed) if !allowed.contains(value) => Err(format!(
                "value {value} not allowed for knob {}; expected one of {}",
                self.name,
                Value::Array(allowed.clone())
            )),
            _ => Ok(()),
        }
    }
}

/// Handle to a registered knob.
#[derive(Clone, Debug)]
pub struct Knob {
    spec: Arc<KnobSpec>,
    value: Shared<Value>,
}

impl Knob {
    pub(crate) fn from_parts(spec: KnobSpec, value: Shared<Value>) -> Self {
        Self {
            spec: Arc::new(spec),
            value,
        }
    }

    /// Knob name.
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    /// Current value.
    pub fn value(&self) -> Value {
        self.value.get()
    }

    /// Current value decoded as `T`.
    pub fn get<T: DeserializeOwned>(&self) -> Option<T> {
        json::decode(&self.value())
    }

    /// Set a new value, rejecting disallowed ones.
    pub fn set(&self, value: Value) -> Result<(), String> {
        self.spec.validate(&value)?;
        debug!(knob = self.name(), %value, "knob set");
        self.value.set(value);
        Ok(())
    }

    pub(crate) fn spec(&self) -> &KnobSpec {
        &self.spec
    }

    pub(crate) fn value_untracked(&self) -> Value {
        self.value.get_untracked()
    }
}

impl HookContext<'_> {
    /// Register a knob. Names must be unique within the tree.
    pub fn use_knob(&mut self, spec: KnobSpec) -> Result<Knob, Interrupt> {
        let (slot, _) = self.custom_slot(|| (), None)?;
        let key = format!("knob:{}", spec.name);
        let default = spec.default.clone();
        let value = self.use_shared_with(&key, SharedOptions { persist: true }, || default)?;
        let owner = self.owner(slot);
        if self.frame().control_named(&spec.name).is_some_and(|o| o != owner) {
            return Err(ProgrammingError::DuplicateControl(spec.name).into());
        }
        let knob = Knob::from_parts(spec, value);
        self.frame()
            .registrations
            .push(Registration::Control(owner, Control::Knob(knob.clone())));
        Ok(knob)
    }
}
