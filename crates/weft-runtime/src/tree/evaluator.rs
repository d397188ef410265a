//! Tree evaluation and reconciliation.
//!
//! Each pass walks the element tree against the committed node tree.
//! Children are matched by `(type, key)` where the key defaults to the
//! sibling position; a match reuses the node's hook slots, anything else
//! mounts fresh. All writes go to a working tree. A completed pass commits
//! it: unmatched old nodes are torn down, hook registrations and callback
//! updates are applied, and effects are handed back for the caller to flush.
//! A suspended pass drops the working tree and leaves the committed tree as
//! it was.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};
use weft_reactive::Cleanup;

use crate::controls::Control;
use crate::errors::{Interrupt, ProgrammingError, RuntimeError};
use crate::hooks::lifecycle::{AfterFormatFn, ExecutionEndFn, TickEndFn, TickStartFn};
use crate::hooks::{ContextEntry, HookContext};
use crate::store::{Owner, RuntimeStore};
use crate::tree::element::{Element, Key, NodeType};
use crate::tree::node::{CleanupCell, Node};
use crate::tree::output::{OutputNode, RenderOutput};
use crate::tree::TreeNodeId;

/// An effect waiting for its pass to commit.
pub(crate) struct PendingEffect {
    pub(crate) cleanup: CleanupCell,
    pub(crate) run: Box<dyn FnOnce() -> Option<Cleanup> + Send>,
}

/// Effects of a committed pass, in evaluation order.
#[derive(Default)]
pub struct PendingEffects {
    effects: Vec<PendingEffect>,
}

impl fmt::Debug for PendingEffects {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingEffects").field("len", &self.effects.len()).finish()
    }
}

impl PendingEffects {
    /// Number of queued effects.
    pub fn len(&self) -> usize {
        self.effects.len()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    /// Run each effect after its previous cleanup.
    pub fn flush(self) {
        for effect in self.effects {
            let previous = effect.cleanup.lock().take();
            if let Some(cleanup) = previous {
                cleanup.run();
            }
            let next = (effect.run)();
            *effect.cleanup.lock() = next;
        }
    }
}

/// A hook registration recorded during a pass and applied at commit.
pub(crate) enum Registration {
    TickStart(Owner, TickStartFn),
    TickEnd(Owner, TickEndFn),
    AfterFormat(Owner, AfterFormatFn),
    ExecutionEnd(Owner, ExecutionEndFn),
    Control(Owner, Control),
}

/// Side work collected during a pass.
#[derive(Default)]
pub(crate) struct Frame {
    pub(crate) effects: Vec<PendingEffect>,
    pub(crate) commit_actions: Vec<Box<dyn FnOnce() + Send>>,
    pub(crate) registrations: Vec<Registration>,
}

impl Frame {
    pub(crate) fn control_named(&self, name: &str) -> Option<Owner> {
        self.registrations.iter().find_map(|r| match r {
            Registration::Control(owner, c) if c.name() == name => Some(*owner),
            _ => None,
        })
    }
}

/// What a committed pass produced.
#[derive(Debug)]
pub struct PassReport {
    /// Normalized output.
    pub output: RenderOutput,
    /// Effects to flush.
    pub effects: PendingEffects,
    /// Nodes created.
    pub mounted: usize,
    /// Nodes re-evaluated in place.
    pub updated: usize,
    /// Nodes torn down.
    pub unmounted: usize,
}

/// Result of one pass.
#[derive(Debug)]
pub enum PassOutcome {
    /// Committed.
    Ready(PassReport),
    /// Discarded while waiting on async data.
    Suspended {
        /// Key awaited.
        key: String,
    },
}

/// Owns the committed node tree of one session.
#[derive(Debug, Default)]
pub struct Evaluator {
    nodes: HashMap<TreeNodeId, Node>,
    roots: Vec<TreeNodeId>,
    next_id: u64,
    passes: u64,
}

struct Pass<'e> {
    prev: &'e HashMap<TreeNodeId, Node>,
    next: HashMap<TreeNodeId, Node>,
    next_id: &'e mut u64,
    frame: Frame,
    contexts: Vec<ContextEntry>,
    mounted: usize,
    updated: usize,
}

impl Evaluator {
    /// Empty evaluator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mounted node count.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Passes committed so far.
    pub fn committed_passes(&self) -> u64 {
        self.passes
    }

    /// Evaluate `root` against the committed tree.
    pub fn evaluate(&mut self, root: &Element, store: &mut RuntimeStore) -> Result<PassOutcome, RuntimeError> {
        store.begin_evaluation();
        let result = self.run_pass(root, store);
        store.end_evaluation(matches!(result, Ok(PassOutcome::Ready(_))));
        result
    }

    fn run_pass(&mut self, root: &Element, store: &mut RuntimeStore) -> Result<PassOutcome, RuntimeError> {
        let mut pass = Pass {
            prev: &self.nodes,
            next: HashMap::new(),
            next_id: &mut self.next_id,
            frame: Frame::default(),
            contexts: Vec::new(),
            mounted: 0,
            updated: 0,
        };
        let mut out = Vec::new();
        let roots = match pass.children(store, &self.roots, std::slice::from_ref(root), &mut out) {
            Ok(ids) => ids,
            Err(Interrupt::Suspended { key }) => {
                debug!(key, "pass suspended, discarding working tree");
                return Ok(PassOutcome::Suspended { key });
            }
            Err(e) => return Err(e.into()),
        };
        let Pass {
            next,
            frame,
            mounted,
            updated,
            ..
        } = pass;

        // Commit.
        let live: HashSet<TreeNodeId> = next.keys().copied().collect();
        let mut gone: Vec<(TreeNodeId, Node)> = self
            .nodes
            .drain()
            .filter(|(id, _)| !live.contains(id))
            .collect();
        gone.sort_by(|a, b| b.0.cmp(&a.0));
        let unmounted = gone.len();
        self.nodes = next;
        self.roots = roots;
        self.passes += 1;

        for (id, node) in gone {
            trace!(node = %id, component = node.name, "unmount");
            node.teardown();
            store.remove_owner_node(id);
        }
        for reg in frame.registrations {
            match reg {
                Registration::TickStart(o, f) => store.lifecycle.tick_start.upsert(o, f),
                Registration::TickEnd(o, f) => store.lifecycle.tick_end.upsert(o, f),
                Registration::AfterFormat(o, f) => store.lifecycle.after_format.upsert(o, f),
                Registration::ExecutionEnd(o, f) => store.lifecycle.execution_end.upsert(o, f),
                Registration::Control(o, c) => store.controls.upsert(o, c),
            }
        }
        for action in frame.commit_actions {
            action();
        }

        debug!(mounted, updated, unmounted, effects = frame.effects.len(), "pass committed");
        Ok(PassOutcome::Ready(PassReport {
            output: RenderOutput { nodes: out },
            effects: PendingEffects {
                effects: frame.effects,
            },
            mounted,
            updated,
            unmounted,
        }))
    }

    /// Tear down every mounted node.
    pub fn unmount_all(&mut self, store: &mut RuntimeStore) {
        let mut all: Vec<(TreeNodeId, Node)> = self.nodes.drain().collect();
        all.sort_by(|a, b| b.0.cmp(&a.0));
        for (id, node) in all {
            node.teardown();
            store.remove_owner_node(id);
        }
        self.roots.clear();
    }
}

impl Pass<'_> {
    fn alloc(&mut self) -> TreeNodeId {
        *self.next_id += 1;
        TreeNodeId(*self.next_id)
    }

    fn children(
        &mut self,
        store: &mut RuntimeStore,
        prev_children: &[TreeNodeId],
        elements: &[Element],
        out: &mut Vec<OutputNode>,
    ) -> Result<Vec<TreeNodeId>, Interrupt> {
        let mut index: HashMap<(NodeType, Key), TreeNodeId> = prev_children
            .iter()
            .filter_map(|id| self.prev.get(id).map(|n| ((n.node_type, n.key.clone()), *id)))
            .collect();
        let mut ids = Vec::with_capacity(elements.len());
        let mut seen = HashSet::with_capacity(elements.len());
        for (position, element) in elements.iter().enumerate() {
            let Some(node_type) = element.node_type() else {
                continue;
            };
            let key = element
                .explicit_key()
                .cloned()
                .unwrap_or(Key::Index(position));
            if !seen.insert((node_type, key.clone())) {
                let sibling = match element {
                    Element::Component(c) => c.name.to_owned(),
                    _ => format!("{node_type:?}"),
                };
                return Err(ProgrammingError::DuplicateKey {
                    key: key.to_string(),
                    sibling,
                }
                .into());
            }
            let matched = index.remove(&(node_type, key.clone()));
            ids.push(self.node(store, matched, node_type, key, element, out)?);
        }
        Ok(ids)
    }

    fn node(
        &mut self,
        store: &mut RuntimeStore,
        matched: Option<TreeNodeId>,
        node_type: NodeType,
        key: Key,
        element: &Element,
        out: &mut Vec<OutputNode>,
    ) -> Result<TreeNodeId, Interrupt> {
        let prev = matched.and_then(|id| self.prev.get(&id).map(|n| (id, n)));
        let (id, mut slots, prev_children, mounting) = match prev {
            Some((id, n)) => (id, n.slots.clone(), n.children.clone(), false),
            None => (self.alloc(), Vec::new(), Vec::new(), true),
        };
        if mounting {
            self.mounted += 1;
        } else {
            self.updated += 1;
        }

        let mut name = "";
        let children = match element {
            Element::Empty => Vec::new(),
            Element::Text(text) => {
                out.push(OutputNode::text(text.clone()));
                Vec::new()
            }
            Element::Host(host) => {
                let mut inner = Vec::new();
                let ids = self.children(store, &prev_children, &host.children, &mut inner)?;
                let out_key = match &host.key {
                    Some(Key::Named(k)) => Some(k.clone()),
                    _ => None,
                };
                out.push(OutputNode::host(host.kind, out_key, host.props.clone(), inner));
                ids
            }
            Element::Fragment(items) => self.children(store, &prev_children, items, out)?,
            Element::Provider(provider) => {
                self.contexts.push((provider.type_id, Arc::clone(&provider.value)));
                let result = self.children(store, &prev_children, &provider.children, out);
                let _ = self.contexts.pop();
                result?
            }
            Element::Component(component) => {
                name = component.name;
                let (rendered, cursor) = {
                    let mut cx = HookContext {
                        node: id,
                        name: component.name,
                        slots: &mut slots,
                        cursor: 0,
                        mounting,
                        store: &mut *store,
                        frame: &mut self.frame,
                        contexts: &self.contexts,
                    };
                    let rendered = component.component.render(&component.props, &mut cx);
                    (rendered, cx.cursor)
                };
                let child = rendered?;
                if cursor != slots.len() {
                    return Err(ProgrammingError::HookCountMismatch {
                        component: component.name.to_owned(),
                        expected: slots.len(),
                        found: cursor,
                    }
                    .into());
                }
                self.children(store, &prev_children, std::slice::from_ref(&child), out)?
            }
        };

        let _ = self.next.insert(
            id,
            Node {
                node_type,
                key,
                name,
                slots,
                children,
            },
        );
        Ok(id)
    }
}
