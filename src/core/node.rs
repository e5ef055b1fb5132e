//! Task tree nodes
//!
//! A `Node` loaded from a case document is a template: it is never mutated.
//! Before a task runs, its node is rendered against the current context into
//! a fresh copy, so loops can render the same template again and again.

use super::Context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How much of a node is rendered before its task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderScope {
    /// Attributes and text of the node itself; children stay templates.
    /// Used by composite tasks, which render their children later with an
    /// extended context.
    Own,
    /// The node and all of its descendants
    Subtree,
}

/// A tagged, ordered tree node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub tag: String,
    #[serde(
        default,
        deserialize_with = "crate::config::deserialize_scalar_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub attrs: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(key.into(), value.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    /// Render a fresh copy with every placeholder in scope substituted
    pub fn render(&self, context: &Context, scope: RenderScope) -> Node {
        let attrs = self
            .attrs
            .iter()
            .map(|(k, v)| (k.clone(), context.interpolate(v).into_owned()))
            .collect();
        let text = self
            .text
            .as_deref()
            .map(|t| context.interpolate(t).into_owned());
        let children = match scope {
            RenderScope::Own => self.children.clone(),
            RenderScope::Subtree => self
                .children
                .iter()
                .map(|child| child.render(context, scope))
                .collect(),
        };

        Node {
            tag: self.tag.clone(),
            attrs,
            text,
            children,
        }
    }
}
