//! The per-session execution core: stabilizing passes and the tick loop.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};
use weft_core::{TimelineEntry, ToolCall};
use weft_reactive::Tracker;

use crate::controls::{self, Control, GateContext};
use crate::errors::RuntimeError;
use crate::hooks::lifecycle::{ExecutionEnd, TickEnd, TickStart};
use crate::model::{ModelOutput, ToolDescriptor};
use crate::scheduler::{Scheduler, Trigger};
use crate::session::agent::AgentParts;
use crate::session::continuation::{Continuation, ExecutionStatus, SendOutcome};
use crate::session::events::{EventBus, SessionEvent};
use crate::store::{DataEntry, PendingFetch, RuntimeStore};
use crate::tree::{Element, Evaluator, PassOutcome, RenderOutput};

/// Everything one session mutates. Lives behind the session's async mutex,
/// so at most one pass or tick runs at a time.
pub(crate) struct SessionCore {
    pub(crate) parts: Arc<AgentParts>,
    pub(crate) root: Element,
    pub(crate) evaluator: Evaluator,
    pub(crate) store: RuntimeStore,
    pub(crate) scheduler: Arc<Scheduler>,
    pub(crate) bus: Arc<EventBus>,
    tracker: Tracker,
    last_output: RenderOutput,
}

impl SessionCore {
    pub(crate) fn new(
        parts: Arc<AgentParts>,
        store: RuntimeStore,
        scheduler: Arc<Scheduler>,
        bus: Arc<EventBus>,
    ) -> Self {
        let notify = Arc::clone(&scheduler);
        let tracker = store
            .reactive()
            .tracker(move || notify.request_implicit("tracked state changed"));
        Self {
            root: parts.root.clone(),
            parts,
            evaluator: Evaluator::new(),
            store,
            scheduler,
            bus,
            tracker,
            last_output: RenderOutput::default(),
        }
    }

    /// Output of the last stable pass.
    pub(crate) fn last_output(&self) -> &RenderOutput {
        &self.last_output
    }

    // ── Passes ──────────────────────────────────────────────────────────

    fn evaluate_once(&mut self) -> Result<PassOutcome, RuntimeError> {
        let Self {
            root,
            evaluator,
            store,
            tracker,
            ..
        } = self;
        let reactive = store.reactive().clone();
        reactive.enter(|| tracker.track(|| evaluator.evaluate(root, store)))
    }

    /// Evaluate until no fetch is pending, awaiting fetches between passes.
    pub(crate) async fn stabilize(&mut self, trigger: Trigger, reason: &str) -> Result<RenderOutput, RuntimeError> {
        let scheduler = Arc::clone(&self.scheduler);
        let _busy = scheduler.busy();
        let mut suspensions = 0u32;
        let mut reason = reason.to_owned();
        loop {
            let _ = self.scheduler.begin_pass(trigger, &reason)?;
            let outcome = match self.evaluate_once() {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.scheduler.end_pass();
                    return Err(e);
                }
            };
            let waiting_on = match outcome {
                PassOutcome::Ready(report) => {
                    let reactive = self.store.reactive().clone();
                    reactive.enter(|| report.effects.flush());
                    self.scheduler.end_pass();
                    if self.store.pending_count() == 0 {
                        self.last_output = report.output.clone();
                        return Ok(report.output);
                    }
                    // Rendered a loading state; fetch and go again.
                    None
                }
                PassOutcome::Suspended { key } => {
                    self.scheduler.end_pass();
                    Some(key)
                }
            };

            suspensions += 1;
            let limit = self.parts.config.max_suspensions;
            if suspensions > limit {
                let _ = self.store.take_pending();
                return Err(RuntimeError::SuspensionLimit(limit));
            }
            self.await_fetches().await?;
            reason = match waiting_on {
                Some(key) => format!("resumed after {key}"),
                None => "fetches settled".to_owned(),
            };
        }
    }

    async fn await_fetches(&mut self) -> Result<(), RuntimeError> {
        let pending = self.store.take_pending();
        if pending.is_empty() {
            return Ok(());
        }
        let timeout = self.parts.config.fetch_timeout;
        let cancel = self.scheduler.cancellation().clone();
        debug!(count = pending.len(), "awaiting fetches");

        let waits = pending.into_iter().map(move |(key, fetch)| async move {
            let PendingFetch { future, deps, persist } = fetch;
            let result = tokio::time::timeout(timeout, future).await;
            (key, deps, persist, result)
        });
        let results = tokio::select! {
            results = join_all(waits) => results,
            () = cancel.cancelled() => return Err(RuntimeError::Cancelled),
        };

        let tick = self.store.tick();
        let mut first_timeout = None;
        for (key, deps, persist, result) in results {
            match result {
                Ok(Ok(value)) => self.store.insert_data(
                    key,
                    DataEntry {
                        value,
                        tick,
                        deps,
                        persist,
                        error: None,
                    },
                ),
                Ok(Err(message)) => {
                    warn!(key, error = %message, "fetch failed");
                    self.store.insert_data(
                        key,
                        DataEntry {
                            value: serde_json::Value::Null,
                            tick,
                            deps,
                            persist,
                            error: Some(message),
                        },
                    );
                }
                Err(_) => {
                    warn!(key, ?timeout, "fetch timed out");
                    if first_timeout.is_none() {
                        first_timeout = Some(RuntimeError::Fetch {
                            key,
                            message: format!("timed out after {timeout:?}"),
                        });
                    }
                }
            }
        }
        first_timeout.map_or(Ok(()), Err)
    }

    // ── Tick loop ───────────────────────────────────────────────────────

    /// Run ticks until a stop decision, the tick cap, or cancellation.
    #[instrument(skip_all, fields(session_id = %self.store.session_id()))]
    pub(crate) async fn execute(&mut self) -> Result<SendOutcome, RuntimeError> {
        let max_ticks = self.parts.config.max_ticks;
        let mut ticks = 0u32;
        let mut result: Option<String> = None;

        let (status, reason) = loop {
            if self.scheduler.cancellation().is_cancelled() {
                break (ExecutionStatus::Cancelled, "cancelled".to_owned());
            }
            if ticks >= max_ticks {
                warn!(max_ticks, "tick limit reached");
                break (ExecutionStatus::MaxTicks, format!("reached {max_ticks} ticks"));
            }
            ticks += 1;
            let (output, decision) = match self.run_tick().await {
                Ok(done) => done,
                Err(RuntimeError::Cancelled) => break (ExecutionStatus::Cancelled, "cancelled".to_owned()),
                Err(e) => return Err(e),
            };
            if !output.content.is_empty() {
                result = Some(output.content);
            }
            if let Continuation::Stop { reason } = decision {
                break (ExecutionStatus::Completed, reason);
            }
        };

        self.finish(status, ticks, &reason).await;
        info!(?status, ticks, tick = self.store.tick(), "execution finished");
        Ok(SendOutcome {
            status,
            result,
            ticks,
            reason,
        })
    }

    async fn run_tick(&mut self) -> Result<(ModelOutput, Continuation), RuntimeError> {
        for input in self.store.queue().drain() {
            let entry = TimelineEntry::user(self.store.tick() + 1, input);
            self.store.push_entry(entry);
        }
        let tick = self.store.advance_tick();
        debug!(tick, "tick start");

        let start = TickStart {
            tick,
            session_id: self.store.session_id().clone(),
        };
        for f in self.store.lifecycle.tick_start.snapshot() {
            if let Err(e) = f(&start) {
                warn!(tick, error = %e, "tick_start callback failed");
            }
        }
        self.bus.emit(SessionEvent::TickStart { tick });

        let mut output = self.stabilize(Trigger::Explicit, &format!("tick {tick}")).await?;
        output
            .nodes
            .extend(controls::render(self.store.controls.values()));

        let mut input = self.parts.formatter.format(&output, self.store.timeline());
        for f in self.store.lifecycle.after_format.snapshot() {
            if let Err(e) = f(&mut input) {
                warn!(tick, error = %e, "after_format callback failed");
            }
        }

        let model = Arc::clone(&self.parts.model);
        let cancel = self.scheduler.cancellation().clone();
        let reply = tokio::select! {
            reply = model.call(input) => reply?,
            () = cancel.cancelled() => return Err(RuntimeError::Cancelled),
        };
        self.store.usage_mut().record_call(reply.usage);
        self.store.push_entry(TimelineEntry::assistant(
            tick,
            reply.content.clone(),
            reply.tool_calls.clone(),
        ));

        let tools = output.tools();
        for call in &reply.tool_calls {
            self.run_tool(tick, &tools, call).await;
        }
        if let Some(limit) = self.parts.config.max_timeline_entries {
            let dropped = self.store.trim_timeline(limit);
            if dropped > 0 {
                debug!(tick, dropped, "timeline trimmed");
            }
        }
        self.store.usage_mut().ticks += 1;

        let decision = Continuation::default_for(!reply.tool_calls.is_empty(), self.store.queue().len());
        let mut end = TickEnd::new(tick, self.store.timeline(), &reply, decision);
        for f in self.store.lifecycle.tick_end.snapshot() {
            if let Err(e) = f(&mut end) {
                warn!(tick, error = %e, "tick_end callback failed");
            }
        }
        let decision = end.into_decision();

        let cx = GateContext {
            tick,
            timeline: self.store.timeline(),
            output: &reply,
        };
        let gates = self.store.controls.values().filter_map(|c| match c {
            Control::Gate(g) => Some(g),
            Control::Knob(_) => None,
        });
        let decision = controls::gate::apply_gates(gates, &cx, decision);

        debug!(tick, decision = ?decision, "tick end");
        self.bus.emit(SessionEvent::TickEnd {
            tick,
            decision: decision.clone(),
        });
        Ok((reply, decision))
    }

    async fn run_tool(&mut self, tick: u64, tools: &[ToolDescriptor], call: &ToolCall) {
        let handled = controls::handle_call(self.store.controls.values(), call);
        let executor = self.parts.tools.clone();
        let result = match handled {
            Some(handled) => handled,
            None => match (tools.iter().find(|t| t.name == call.name), executor) {
                (Some(tool), Some(executor)) => executor.execute(tool, call).await,
                (None, _) => Err(format!("unknown tool: {}", call.name)),
                (Some(_), None) => Err(format!("no executor for tool: {}", call.name)),
            },
        };
        let (content, is_error) = match result {
            Ok(serde_json::Value::String(s)) => (s, false),
            Ok(value) => (value.to_string(), false),
            Err(message) => {
                debug!(tool = %call.name, error = %message, "tool call failed");
                (message, true)
            }
        };
        self.store
            .push_entry(TimelineEntry::tool_result(tick, call.id.clone(), content, is_error));
        self.bus.emit(SessionEvent::ToolCall {
            tick,
            name: call.name.clone(),
            is_error,
        });
    }

    async fn finish(&mut self, status: ExecutionStatus, ticks: u32, reason: &str) {
        let end = ExecutionEnd {
            status,
            ticks,
            tick: self.store.tick(),
            reason: reason.to_owned(),
        };
        for f in self.store.lifecycle.execution_end.snapshot() {
            if let Err(e) = f(&end) {
                warn!(error = %e, "execution_end callback failed");
            }
        }
        self.persist().await;
        self.bus.emit(SessionEvent::ExecutionEnd { status, ticks });
    }

    /// Save a snapshot. Failures are reported, never returned.
    pub(crate) async fn persist(&mut self) {
        let snapshot = self.store.snapshot();
        let store = Arc::clone(&self.parts.store);
        if let Err(e) = store.save(&snapshot).await {
            warn!(session_id = %snapshot.session_id, error = %e, "snapshot save failed");
            self.parts.restore.report_persist_error(&e);
            self.bus.emit(SessionEvent::PersistFailed { message: e.to_string() });
        }
    }
}
