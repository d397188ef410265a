//! Declarative tree description.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use weft_core::Role;

use crate::errors::Interrupt;
use crate::hooks::HookContext;

/// What a component returns.
pub type Render = Result<Element, Interrupt>;

/// A unit of composition: props in, element out, hooks in a fixed order.
pub trait Component: Send + Sync + 'static {
    /// Evaluate once.
    fn render(&self, props: &Value, cx: &mut HookContext<'_>) -> Render;
}

impl<F> Component for F
where
    F: Fn(&Value, &mut HookContext<'_>) -> Render + Send + Sync + 'static,
{
    fn render(&self, props: &Value, cx: &mut HookContext<'_>) -> Render {
        self(props, cx)
    }
}

/// Host element kinds: the vocabulary of the output tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKind {
    /// Titled instruction block.
    Section,
    /// Message injected ahead of the timeline.
    Message,
    /// Tool offered to the model.
    Tool,
    /// Untitled container.
    Group,
}

/// Child identity within one parent.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    /// Explicit key.
    Named(String),
    /// Implicit key: position among siblings.
    Index(usize),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(k) => f.write_str(k),
            Self::Index(i) => write!(f, "#{i}"),
        }
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self::Named(s.to_owned())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self::Named(s)
    }
}

impl From<u64> for Key {
    fn from(n: u64) -> Self {
        Self::Named(n.to_string())
    }
}

/// A host element.
#[derive(Clone, Debug)]
pub struct HostElement {
    /// Kind.
    pub kind: HostKind,
    /// Explicit key.
    pub key: Option<Key>,
    /// Props copied to the output node.
    pub props: Value,
    /// Children.
    pub children: Vec<Element>,
}

/// A component element.
#[derive(Clone)]
pub struct ComponentElement {
    pub(crate) type_id: TypeId,
    pub(crate) name: &'static str,
    pub(crate) component: Arc<dyn Component>,
    /// Explicit key.
    pub key: Option<Key>,
    /// Props passed to `render`.
    pub props: Value,
}

impl ComponentElement {
    /// Short type name used in diagnostics.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ComponentElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentElement")
            .field("name", &self.name)
            .field("key", &self.key)
            .field("props", &self.props)
            .finish_non_exhaustive()
    }
}

/// A context value made visible to a subtree.
#[derive(Clone)]
pub struct ProviderElement {
    pub(crate) type_id: TypeId,
    pub(crate) value: Arc<dyn Any + Send + Sync>,
    /// Children that can read the value.
    pub children: Vec<Element>,
}

impl fmt::Debug for ProviderElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderElement")
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

/// A node of the declarative tree.
#[derive(Clone, Debug, Default)]
pub enum Element {
    /// Nothing. Still occupies its sibling position.
    #[default]
    Empty,
    /// Text leaf.
    Text(String),
    /// Host element.
    Host(HostElement),
    /// Component.
    Component(ComponentElement),
    /// Children spliced into the parent.
    Fragment(Vec<Element>),
    /// Context provider.
    Provider(ProviderElement),
}

fn short_type_name<C>() -> &'static str {
    let full = std::any::type_name::<C>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

impl Element {
    /// Component element. Identity is the component's Rust type.
    pub fn component<C: Component>(component: C, props: Value) -> Self {
        Self::Component(ComponentElement {
            type_id: TypeId::of::<C>(),
            name: short_type_name::<C>(),
            component: Arc::new(component),
            key: None,
            props,
        })
    }

    /// Component element with an explicit diagnostic name.
    pub fn named<C: Component>(name: &'static str, component: C, props: Value) -> Self {
        match Self::component(component, props) {
            Self::Component(mut c) => {
                c.name = name;
                Self::Component(c)
            }
            other => other,
        }
    }

    /// Text leaf.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Host element.
    pub fn host(kind: HostKind, props: Value, children: Vec<Element>) -> Self {
        Self::Host(HostElement {
            kind,
            key: None,
            props,
            children,
        })
    }

    /// Titled section.
    pub fn section(title: impl Into<String>, children: Vec<Element>) -> Self {
        Self::host(HostKind::Section, json!({ "title": title.into() }), children)
    }

    /// Message injected ahead of the timeline.
    pub fn message(role: Role, content: impl Into<String>) -> Self {
        Self::host(
            HostKind::Message,
            json!({ "role": role }),
            vec![Self::text(content)],
        )
    }

    /// Tool offered to the model.
    pub fn tool(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        let name = name.into();
        Self::host(
            HostKind::Tool,
            json!({ "name": name, "description": description.into(), "parameters": parameters }),
            Vec::new(),
        )
        .with_key(name)
    }

    /// Untitled container.
    pub fn group(children: Vec<Element>) -> Self {
        Self::host(HostKind::Group, Value::Null, children)
    }

    /// Children spliced into the parent.
    pub fn fragment(children: Vec<Element>) -> Self {
        Self::Fragment(children)
    }

    /// Provide `value` to every descendant calling `use_context::<T>()`.
    pub fn provider<T: Send + Sync + 'static>(value: T, children: Vec<Element>) -> Self {
        Self::Provider(ProviderElement {
            type_id: TypeId::of::<T>(),
            value: Arc::new(value),
            children,
        })
    }

    /// Attach an explicit key. No effect on elements without identity.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<Key>) -> Self {
        match &mut self {
            Self::Host(h) => h.key = Some(key.into()),
            Self::Component(c) => c.key = Some(key.into()),
            _ => {}
        }
        self
    }

    /// Replace a component's props.
    #[must_use]
    pub fn with_props(mut self, props: Value) -> Self {
        if let Self::Component(c) = &mut self {
            c.props = props;
        }
        self
    }

    /// Whether this is [`Element::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl From<&str> for Element {
    fn from(s: &str) -> Self {
        Self::text(s)
    }
}

impl From<String> for Element {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl<T: Into<Element>> From<Option<T>> for Element {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Empty, Into::into)
    }
}

impl From<Vec<Element>> for Element {
    fn from(children: Vec<Element>) -> Self {
        Self::Fragment(children)
    }
}

/// Identity of a node kind for child matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum NodeType {
    Text,
    Host(HostKind),
    Component(TypeId),
    Fragment,
    Provider(TypeId),
}

impl Element {
    pub(crate) fn node_type(&self) -> Option<NodeType> {
        match self {
            Self::Empty => None,
            Self::Text(_) => Some(NodeType::Text),
            Self::Host(h) => Some(NodeType::Host(h.kind)),
            Self::Component(c) => Some(NodeType::Component(c.type_id)),
            Self::Fragment(_) => Some(NodeType::Fragment),
            Self::Provider(p) => Some(NodeType::Provider(p.type_id)),
        }
    }

    pub(crate) fn explicit_key(&self) -> Option<&Key> {
        match self {
            Self::Host(h) => h.key.as_ref(),
            Self::Component(c) => c.key.as_ref(),
            _ => None,
        }
    }
}
