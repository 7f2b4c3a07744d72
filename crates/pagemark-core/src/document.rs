//! The live document seam.
//!
//! Anchoring and the overlay only ever touch a page through [`HostDocument`], so the same
//! algorithms run against the in-memory tree shipped in `pagemark-local` or any other tree
//! that can honour these operations.

use crate::Result;
use std::fmt::Debug;
use std::hash::Hash;
use std::ops::Range;

/// Description of an element to create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ElementSpec {
    pub tag: String,
    pub classes: Vec<String>,
    pub attrs: Vec<(String, String)>,
}

impl ElementSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((name.into(), value.into()));
        self
    }

    /// All attributes, with `class` folded in when classes are present.
    pub fn attributes(&self) -> Vec<(String, String)> {
        let mut out = Vec::with_capacity(self.attrs.len() + 1);
        if !self.classes.is_empty() {
            out.push(("class".to_string(), self.classes.join(" ")));
        }
        out.extend(
            self.attrs
                .iter()
                .filter(|(k, _)| k != "class")
                .cloned(),
        );
        out
    }
}

/// A mutable node tree with text leaves.
///
/// Text offsets are byte offsets into the leaf's text and must fall on `char` boundaries.
pub trait HostDocument {
    type Node: Copy + Eq + Hash + Debug;

    fn body(&self) -> Self::Node;

    /// Rendered text leaves under `root`, in document order.
    fn text_leaves(&self, root: Self::Node) -> Vec<Self::Node>;

    fn text(&self, node: Self::Node) -> Option<&str>;

    /// Split `node` around `range` and wrap the middle in a new element.
    ///
    /// The original node keeps the text before `range`, so offsets earlier in the same
    /// leaf stay valid after the call.
    fn wrap_text_range(
        &mut self,
        node: Self::Node,
        range: Range<usize>,
        spec: &ElementSpec,
    ) -> Result<Self::Node>;

    fn create_element(&mut self, spec: &ElementSpec) -> Self::Node;

    fn create_text(&mut self, text: &str) -> Self::Node;

    fn append_child(&mut self, parent: Self::Node, child: Self::Node) -> Result<()>;

    /// Detach `node` (and its subtree) from the tree.
    fn remove(&mut self, node: Self::Node);

    /// Replace an element with its children.
    fn unwrap(&mut self, node: Self::Node) -> Result<()>;

    /// Replace all children of `node` with a single text leaf.
    fn set_text_content(&mut self, node: Self::Node, text: &str) -> Result<()>;

    /// Attached elements under `root` carrying `class`, in document order.
    fn elements_with_class(&self, root: Self::Node, class: &str) -> Vec<Self::Node>;

    fn attr(&self, node: Self::Node, name: &str) -> Option<&str>;

    fn set_attr(&mut self, node: Self::Node, name: &str, value: &str) -> Result<()>;

    fn scroll_into_view(&mut self, node: Self::Node);

    /// Concatenated text of `node`'s subtree, as rendered.
    fn text_content(&self, node: Self::Node) -> String;

    /// `innerText`-like rendering of `root`.
    fn inner_text(&self, root: Self::Node) -> String;

    fn has_class(&self, node: Self::Node, class: &str) -> bool {
        self.attr(node, "class")
            .is_some_and(|c| c.split_ascii_whitespace().any(|c| c == class))
    }

    fn add_class(&mut self, node: Self::Node, class: &str) -> Result<()> {
        if self.has_class(node, class) {
            return Ok(());
        }
        let next = match self.attr(node, "class") {
            Some(c) if !c.trim().is_empty() => format!("{} {class}", c.trim()),
            _ => class.to_string(),
        };
        self.set_attr(node, "class", &next)
    }

    fn remove_class(&mut self, node: Self::Node, class: &str) -> Result<()> {
        let Some(current) = self.attr(node, "class") else {
            return Ok(());
        };
        if !current.split_ascii_whitespace().any(|c| c == class) {
            return Ok(());
        }
        let next = current
            .split_ascii_whitespace()
            .filter(|c| *c != class)
            .collect::<Vec<_>>()
            .join(" ");
        self.set_attr(node, "class", &next)
    }
}
