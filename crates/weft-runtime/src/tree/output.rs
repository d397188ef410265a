//! Normalized evaluation output.
//!
//! Components are transparent: only host elements and text appear here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use weft_core::Role;

use crate::model::ToolDescriptor;
use crate::tree::HostKind;

/// Kind of an output node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Titled block of instructions.
    Section,
    /// Message injected ahead of the timeline.
    Message,
    /// Tool offered to the model.
    Tool,
    /// Untitled container.
    Group,
    /// Plain text.
    Text,
}

impl From<HostKind> for OutputKind {
    fn from(kind: HostKind) -> Self {
        match kind {
            HostKind::Section => Self::Section,
            HostKind::Message => Self::Message,
            HostKind::Tool => Self::Tool,
            HostKind::Group => Self::Group,
        }
    }
}

/// One node of the output tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputNode {
    /// Node kind.
    pub kind: OutputKind,
    /// Explicit key, when the element had one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Host props.
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub props: Value,
    /// Text of a text node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Child nodes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<OutputNode>,
}

impl OutputNode {
    /// A text leaf.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: OutputKind::Text,
            key: None,
            props: Value::Null,
            text: Some(text.into()),
            children: Vec::new(),
        }
    }

    /// A host node.
    pub fn host(kind: HostKind, key: Option<String>, props: Value, children: Vec<Self>) -> Self {
        Self {
            kind: kind.into(),
            key,
            props,
            text: None,
            children,
        }
    }

    /// String prop by name.
    pub fn prop_str(&self, name: &str) -> Option<&str> {
        self.props.get(name).and_then(Value::as_str)
    }

    /// Section title, if any.
    pub fn title(&self) -> Option<&str> {
        self.prop_str("title")
    }

    /// Concatenated text of this node and its descendants, one line per leaf.
    pub fn text_content(&self) -> String {
        let mut lines = Vec::new();
        self.collect_text(&mut lines);
        lines.join("\n")
    }

    fn collect_text<'a>(&'a self, out: &mut Vec<&'a str>) {
        if let Some(t) = &self.text {
            out.push(t);
        }
        for child in &self.children {
            child.collect_text(out);
        }
    }

    /// Depth-first walk over this node and its descendants.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a OutputNode)) {
        f(self);
        for child in &self.children {
            child.walk(f);
        }
    }
}

/// Result of one committed evaluation pass.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderOutput {
    /// Top-level nodes in tree order.
    pub nodes: Vec<OutputNode>,
}

impl RenderOutput {
    /// Every node of `kind`, depth first.
    pub fn of_kind(&self, kind: OutputKind) -> Vec<&OutputNode> {
        let mut out = Vec::new();
        for node in &self.nodes {
            node.walk(&mut |n| {
                if n.kind == kind {
                    out.push(n);
                }
            });
        }
        out
    }

    /// Every section node.
    pub fn sections(&self) -> Vec<&OutputNode> {
        self.of_kind(OutputKind::Section)
    }

    /// First section with the given title.
    pub fn section(&self, title: &str) -> Option<&OutputNode> {
        self.sections().into_iter().find(|s| s.title() == Some(title))
    }

    /// Every message node as `(role, content)`.
    pub fn messages(&self) -> Vec<(Role, String)> {
        self.of_kind(OutputKind::Message)
            .into_iter()
            .map(|m| {
                let role = m
                    .props
                    .get("role")
                    .and_then(|r| serde_json::from_value(r.clone()).ok())
                    .unwrap_or(Role::User);
                (role, m.text_content())
            })
            .collect()
    }

    /// Every tool node decoded as a descriptor. Malformed tool props are skipped.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.of_kind(OutputKind::Tool)
            .into_iter()
            .filter_map(|t| serde_json::from_value(t.props.clone()).ok())
            .collect()
    }

    /// Full text of the output, one line per text leaf.
    pub fn text_content(&self) -> String {
        self.nodes
            .iter()
            .map(OutputNode::text_content)
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}
