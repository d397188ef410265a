//! Tick lifecycle callbacks.
//!
//! Registrations are owned by the hook slot that made them: re-evaluating a
//! node replaces its callbacks in place, unmounting it removes them. Within
//! each phase callbacks run in registration order. A callback error is
//! logged and the remaining callbacks still run.

use std::sync::Arc;

use weft_core::{SessionId, TimelineEntry};

use crate::errors::Interrupt;
use crate::hooks::HookContext;
use crate::model::{ModelInput, ModelOutput};
use crate::session::continuation::{Continuation, ExecutionStatus};
use crate::store::Owner;
use crate::tree::evaluator::Registration;

/// Passed to tick-start callbacks.
#[derive(Clone, Debug)]
pub struct TickStart {
    /// Tick about to run.
    pub tick: u64,
    /// Owning session.
    pub session_id: SessionId,
}

/// Passed to tick-end callbacks. Callbacks may override the decision.
#[derive(Debug)]
pub struct TickEnd<'a> {
    tick: u64,
    timeline: &'a [TimelineEntry],
    output: &'a ModelOutput,
    decision: Continuation,
}

impl<'a> TickEnd<'a> {
    pub(crate) fn new(
        tick: u64,
        timeline: &'a [TimelineEntry],
        output: &'a ModelOutput,
        decision: Continuation,
    ) -> Self {
        Self {
            tick,
            timeline,
            output,
            decision,
        }
    }

    /// Tick that just finished.
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Timeline including this tick's entries.
    pub fn timeline(&self) -> &[TimelineEntry] {
        self.timeline
    }

    /// The model's reply for this tick.
    pub fn output(&self) -> &ModelOutput {
        self.output
    }

    /// Decision so far.
    pub fn decision(&self) -> &Continuation {
        &self.decision
    }

    /// Replace the decision.
    pub fn set_decision(&mut self, decision: Continuation) {
        self.decision = decision;
    }

    /// Ask for another tick.
    pub fn request_continue(&mut self, reason: impl Into<String>) {
        self.decision = Continuation::Continue {
            reason: reason.into(),
        };
    }

    /// Ask to stop after this tick.
    pub fn request_stop(&mut self, reason: impl Into<String>) {
        self.decision = Continuation::Stop {
            reason: reason.into(),
        };
    }

    pub(crate) fn into_decision(self) -> Continuation {
        self.decision
    }
}

/// Passed to execution-end callbacks.
#[derive(Clone, Debug)]
pub struct ExecutionEnd {
    /// How the execution ended.
    pub status: ExecutionStatus,
    /// Ticks run by this execution.
    pub ticks: u32,
    /// Session tick counter at the end.
    pub tick: u64,
    /// Reason of the final decision.
    pub reason: String,
}

/// Tick-start callback.
pub type TickStartFn = Arc<dyn Fn(&TickStart) -> anyhow::Result<()> + Send + Sync>;
/// Tick-end callback.
pub type TickEndFn = Arc<dyn Fn(&mut TickEnd<'_>) -> anyhow::Result<()> + Send + Sync>;
/// After-format callback; may adjust the model input.
pub type AfterFormatFn = Arc<dyn Fn(&mut ModelInput) -> anyhow::Result<()> + Send + Sync>;
/// Execution-end callback.
pub type ExecutionEndFn = Arc<dyn Fn(&ExecutionEnd) -> anyhow::Result<()> + Send + Sync>;

impl HookContext<'_> {
    fn register(&mut self, make: impl FnOnce(Owner) -> Registration) -> Result<(), Interrupt> {
        let (slot, _) = self.custom_slot(|| (), None)?;
        let owner = self.owner(slot);
        self.frame().registrations.push(make(owner));
        Ok(())
    }

    /// Run `f` at the start of every tick, before evaluation.
    pub fn use_tick_start<F>(&mut self, f: F) -> Result<(), Interrupt>
    where
        F: Fn(&TickStart) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(|owner| Registration::TickStart(owner, Arc::new(f)))
    }

    /// Run `f` after the model replied and tools ran; it may change whether
    /// the execution continues.
    pub fn use_tick_end<F>(&mut self, f: F) -> Result<(), Interrupt>
    where
        F: Fn(&mut TickEnd<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(|owner| Registration::TickEnd(owner, Arc::new(f)))
    }

    /// Run `f` on the formatted model input before it is sent.
    pub fn use_after_format<F>(&mut self, f: F) -> Result<(), Interrupt>
    where
        F: Fn(&mut ModelInput) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(|owner| Registration::AfterFormat(owner, Arc::new(f)))
    }

    /// Run `f` once when an execution stops.
    pub fn use_execution_end<F>(&mut self, f: F) -> Result<(), Interrupt>
    where
        F: Fn(&ExecutionEnd) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(|owner| Registration::ExecutionEnd(owner, Arc::new(f)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_end_decision_can_be_overridden() {
        let output = ModelOutput::text("done");
        let mut end = TickEnd::new(
            3,
            &[],
            &output,
            Continuation::Continue {
                reason: "tools ran".into(),
            },
        );
        end.request_stop("enough");
        assert_eq!(end.tick(), 3);
        assert_eq!(end.output().content, "done");
        assert_eq!(
            end.into_decision(),
            Continuation::Stop {
                reason: "enough".into()
            }
        );
    }
}
