//! Mutable HTML document implementing [`HostDocument`].
//!
//! The tree is the one `scraper` builds while parsing (an `ego_tree` arena of html5ever
//! nodes), edited in place and written back out through html5ever's serializer.

use ego_tree::iter::Edge;
use ego_tree::{NodeId, NodeMut, NodeRef};
use html5ever::serialize::{serialize, Serialize, SerializeOpts, Serializer, TraversalScope};
use html5ever::tendril::StrTendril;
use html5ever::{Attribute, LocalName, Namespace, QualName};
use html_scraper::node::{Element, Text};
use html_scraper::{Html, Node};
use pagemark_core::{ElementSpec, Error, HostDocument, Result};
use std::io;
use std::ops::Range;

const HTML_NS: &str = "http://www.w3.org/1999/xhtml";

/// Elements whose text is never rendered.
const SKIP_TAGS: &[&str] = &["script", "style", "noscript", "template", "textarea", "head"];

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "body", "dd", "details", "dialog", "div",
    "dl", "dt", "fieldset", "figcaption", "figure", "footer", "form", "header", "hr", "html",
    "li", "main", "nav", "ol", "pre", "section", "summary", "table", "tr", "ul",
];

/// Blocks rendered with a blank line around them.
const SPACED_BLOCK_TAGS: &[&str] = &["p", "h1", "h2", "h3", "h4", "h5", "h6"];

fn html_name(local: &str) -> QualName {
    QualName::new(None, Namespace::from(HTML_NS), LocalName::from(local))
}

fn plain_attr_name(local: &str) -> QualName {
    QualName::new(None, Namespace::from(""), LocalName::from(local))
}

fn is_plain_attr(name: &QualName, wanted: &str) -> bool {
    name.ns.is_empty() && name.local.eq_str_ignore_ascii_case(wanted)
}

/// Text under elements that are skipped or carry `hidden` never reaches the reader.
fn is_rendered(el: &Element) -> bool {
    !SKIP_TAGS.contains(&el.name()) && !el.attrs.keys().any(|k| is_plain_attr(k, "hidden"))
}

fn doc_error(message: &str) -> Error {
    Error::Document(message.to_string())
}

#[derive(Debug, Clone)]
pub struct Dom {
    html: Html,
    body: NodeId,
    last_scrolled: Option<NodeId>,
}

impl Dom {
    /// Parse a full HTML document. Missing `html`/`head`/`body` are synthesized by the parser.
    pub fn parse(source: &str) -> Self {
        let mut html = Html::parse_document(source);
        let root = html.tree.root().id();
        let found = html
            .tree
            .root()
            .descendants()
            .find(|n| n.value().as_element().is_some_and(|el| el.name() == "body"))
            .map(|n| n.id());
        let body = match found {
            Some(body) => body,
            None => {
                let host = html
                    .tree
                    .root()
                    .children()
                    .find(|n| n.value().is_element())
                    .map_or(root, |n| n.id());
                let body = html
                    .tree
                    .orphan(Node::Element(Element::new(html_name("body"), Vec::new())))
                    .id();
                if let Some(mut host) = html.tree.get_mut(host) {
                    host.append_id(body);
                }
                body
            }
        };
        Dom {
            html,
            body,
            last_scrolled: None,
        }
    }

    /// The parsed page, for selector queries.
    pub fn document(&self) -> &Html {
        &self.html
    }

    pub fn root(&self) -> NodeId {
        self.html.tree.root().id()
    }

    pub fn head(&self) -> Option<NodeId> {
        self.find_first(self.root(), "head")
    }

    /// Last node passed to `scroll_into_view`.
    pub fn last_scrolled(&self) -> Option<NodeId> {
        self.last_scrolled
    }

    fn get(&self, node: NodeId) -> Option<NodeRef<'_, Node>> {
        self.html.tree.get(node)
    }

    fn get_mut(&mut self, node: NodeId) -> Result<NodeMut<'_, Node>> {
        self.html
            .tree
            .get_mut(node)
            .ok_or_else(|| doc_error("unknown node"))
    }

    fn element(&self, node: NodeId) -> Option<&Element> {
        self.get(node)?.value().as_element()
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        self.element(node).map(Element::name)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.get(node)?.parent().map(|p| p.id())
    }

    pub fn children(&self, node: NodeId) -> Vec<NodeId> {
        self.get(node)
            .map(|n| n.children().map(|c| c.id()).collect())
            .unwrap_or_default()
    }

    /// First attached element named `tag` under `root` (inclusive), in document order.
    pub fn find_first(&self, root: NodeId, tag: &str) -> Option<NodeId> {
        self.get(root)?
            .descendants()
            .find(|n| n.value().as_element().is_some_and(|el| el.name() == tag))
            .map(|n| n.id())
    }

    /// Serialize the whole document.
    pub fn to_html(&self) -> Result<String> {
        self.serialize_node(self.root(), TraversalScope::ChildrenOnly(None))
    }

    pub fn outer_html(&self, node: NodeId) -> Result<String> {
        self.serialize_node(node, TraversalScope::IncludeNode)
    }

    pub fn inner_html(&self, node: NodeId) -> Result<String> {
        self.serialize_node(node, TraversalScope::ChildrenOnly(None))
    }

    fn serialize_node(&self, node: NodeId, scope: TraversalScope) -> Result<String> {
        let node = self.get(node).ok_or_else(|| doc_error("unknown node"))?;
        let opts = SerializeOpts {
            scripting_enabled: true,
            traversal_scope: scope,
            create_missing_parent: false,
        };
        let mut buf = Vec::new();
        serialize(&mut buf, &Subtree(node), opts)
            .map_err(|e| Error::Document(format!("serialize: {e}")))?;
        String::from_utf8(buf).map_err(|e| Error::Document(format!("serialize: {e}")))
    }

    fn set_leaf_text(&mut self, node: NodeId, text: &str) -> Result<()> {
        let mut n = self.get_mut(node)?;
        match n.value() {
            Node::Text(t) => {
                t.text = StrTendril::from_slice(text);
                Ok(())
            }
            _ => Err(doc_error("not a text node")),
        }
    }

    /// Merge adjacent text children of `node`.
    fn normalize(&mut self, node: NodeId) {
        let mut prev: Option<NodeId> = None;
        for c in self.children(node) {
            let Some(text) = self.text(c).map(str::to_string) else {
                prev = None;
                continue;
            };
            let Some(p) = prev else {
                prev = Some(c);
                continue;
            };
            if let Some(mut pn) = self.html.tree.get_mut(p) {
                if let Node::Text(t) = pn.value() {
                    t.text.push_slice(&text);
                }
            }
            if let Some(mut cn) = self.html.tree.get_mut(c) {
                cn.detach();
            }
        }
    }
}

/// A node and its descendants, written the way html5ever writes a parsed document.
struct Subtree<'a>(NodeRef<'a, Node>);

impl Serialize for Subtree<'_> {
    fn serialize<S>(&self, serializer: &mut S, scope: TraversalScope) -> io::Result<()>
    where
        S: Serializer,
    {
        let skip_self = scope == TraversalScope::ChildrenOnly(None);
        for edge in self.0.traverse() {
            match edge {
                Edge::Open(node) => {
                    if skip_self && node == self.0 {
                        continue;
                    }
                    match node.value() {
                        Node::Doctype(d) => serializer.write_doctype(d.name())?,
                        Node::Comment(c) => serializer.write_comment(c)?,
                        Node::Text(t) => serializer.write_text(t)?,
                        Node::Element(el) => serializer
                            .start_elem(el.name.clone(), el.attrs.iter().map(|(k, v)| (k, &v[..])))?,
                        _ => {}
                    }
                }
                Edge::Close(node) => {
                    if skip_self && node == self.0 {
                        continue;
                    }
                    if let Some(el) = node.value().as_element() {
                        serializer.end_elem(el.name.clone())?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn render_into(node: NodeRef<'_, Node>, pre: bool, sink: &mut TextSink) {
    match node.value() {
        Node::Text(t) => sink.text(t, pre),
        Node::Document | Node::Fragment => {
            for c in node.children() {
                render_into(c, pre, sink);
            }
        }
        Node::Element(el) => {
            if !is_rendered(el) {
                return;
            }
            let name = el.name();
            if name == "br" {
                sink.line_break();
                return;
            }
            let breaks = if SPACED_BLOCK_TAGS.contains(&name) {
                2
            } else if BLOCK_TAGS.contains(&name) {
                1
            } else {
                0
            };
            sink.request(breaks);
            if matches!(name, "td" | "th") {
                sink.text(" ", false);
            }
            let pre = pre || name == "pre";
            for c in node.children() {
                render_into(c, pre, sink);
            }
            sink.request(breaks);
        }
        _ => {}
    }
}

#[derive(Default)]
struct TextSink {
    out: String,
    pending: usize,
}

impl TextSink {
    fn request(&mut self, breaks: usize) {
        self.pending = self.pending.max(breaks);
    }

    fn flush_breaks(&mut self) {
        if self.pending == 0 {
            return;
        }
        if !self.out.is_empty() {
            let kept = self.out.trim_end_matches(' ').len();
            self.out.truncate(kept);
            let existing = self.out.len() - self.out.trim_end_matches('\n').len();
            for _ in existing..self.pending {
                self.out.push('\n');
            }
        }
        self.pending = 0;
    }

    fn line_break(&mut self) {
        self.flush_breaks();
        let kept = self.out.trim_end_matches(' ').len();
        self.out.truncate(kept);
        self.out.push('\n');
    }

    fn text(&mut self, t: &str, pre: bool) {
        if pre {
            if !t.is_empty() {
                self.flush_breaks();
                self.out.push_str(t);
            }
            return;
        }
        let mut collapsed = String::with_capacity(t.len());
        let mut in_space = false;
        for c in t.chars() {
            if c.is_ascii_whitespace() {
                in_space = true;
                continue;
            }
            if in_space {
                collapsed.push(' ');
            }
            in_space = false;
            collapsed.push(c);
        }
        if in_space {
            collapsed.push(' ');
        }
        if collapsed.trim().is_empty() {
            // Whitespace-only text only separates inline content.
            if !collapsed.is_empty()
                && self.pending == 0
                && !self.out.is_empty()
                && !self.out.ends_with([' ', '\n'])
            {
                self.out.push(' ');
            }
            return;
        }
        self.flush_breaks();
        let at_line_start = self.out.is_empty() || self.out.ends_with(['\n', ' ']);
        let piece = if at_line_start {
            collapsed.trim_start()
        } else {
            collapsed.as_str()
        };
        self.out.push_str(piece);
    }

    fn finish(self) -> String {
        self.out.trim_end().trim_start_matches('\n').to_string()
    }
}

impl HostDocument for Dom {
    type Node = NodeId;

    fn body(&self) -> NodeId {
        self.body
    }

    fn text_leaves(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let Some(start) = self.get(root) else {
            return out;
        };
        let mut stack = vec![start];
        while let Some(n) = stack.pop() {
            match n.value() {
                Node::Text(t) if !t.is_empty() => out.push(n.id()),
                Node::Element(el) if !is_rendered(el) => {}
                Node::Element(_) | Node::Document | Node::Fragment => {
                    let children: Vec<_> = n.children().collect();
                    stack.extend(children.into_iter().rev());
                }
                _ => {}
            }
        }
        out
    }

    fn text(&self, node: NodeId) -> Option<&str> {
        match self.get(node)?.value() {
            Node::Text(t) => Some(&**t),
            _ => None,
        }
    }

    fn wrap_text_range(
        &mut self,
        node: NodeId,
        range: Range<usize>,
        spec: &ElementSpec,
    ) -> Result<NodeId> {
        let text = self
            .text(node)
            .ok_or_else(|| doc_error("wrap target is not a text node"))?
            .to_string();
        if range.start >= range.end
            || range.end > text.len()
            || !text.is_char_boundary(range.start)
            || !text.is_char_boundary(range.end)
        {
            return Err(Error::Document(format!(
                "invalid range {}..{} for text of {} bytes",
                range.start,
                range.end,
                text.len()
            )));
        }
        if self.parent(node).is_none() {
            return Err(doc_error("wrap target is detached"));
        }

        let element = self.create_element(spec);
        let middle = self.create_text(&text[range.clone()]);
        self.get_mut(element)?.append_id(middle);
        self.get_mut(node)?.insert_id_after(element);
        if range.end < text.len() {
            let after = self.create_text(&text[range.end..]);
            self.get_mut(element)?.insert_id_after(after);
        }
        self.set_leaf_text(node, &text[..range.start])?;
        Ok(element)
    }

    fn create_element(&mut self, spec: &ElementSpec) -> NodeId {
        let attrs = spec
            .attributes()
            .into_iter()
            .map(|(k, v)| Attribute {
                name: plain_attr_name(&k.to_ascii_lowercase()),
                value: StrTendril::from_slice(&v),
            })
            .collect();
        let name = html_name(&spec.tag.to_ascii_lowercase());
        self.html
            .tree
            .orphan(Node::Element(Element::new(name, attrs)))
            .id()
    }

    fn create_text(&mut self, text: &str) -> NodeId {
        self.html
            .tree
            .orphan(Node::Text(Text {
                text: StrTendril::from_slice(text),
            }))
            .id()
    }

    fn append_child(&mut self, parent: NodeId, child: NodeId) -> Result<()> {
        match self.get(parent).map(|n| n.value()) {
            Some(Node::Element(_) | Node::Document | Node::Fragment) => {}
            Some(_) => return Err(doc_error("parent cannot have children")),
            None => return Err(doc_error("unknown node")),
        }
        if self.get(child).is_none() {
            return Err(doc_error("unknown node"));
        }
        let mut cursor = Some(parent);
        while let Some(n) = cursor {
            if n == child {
                return Err(doc_error("cannot append a node inside itself"));
            }
            cursor = self.parent(n);
        }
        self.get_mut(parent)?.append_id(child);
        Ok(())
    }

    fn remove(&mut self, node: NodeId) {
        if let Some(mut n) = self.html.tree.get_mut(node) {
            n.detach();
        }
    }

    fn unwrap(&mut self, node: NodeId) -> Result<()> {
        if self.element(node).is_none() {
            return Err(doc_error("only elements can be unwrapped"));
        }
        let parent = self
            .parent(node)
            .ok_or_else(|| doc_error("cannot unwrap a detached element"))?;
        for c in self.children(node) {
            self.get_mut(node)?.insert_id_before(c);
        }
        self.get_mut(node)?.detach();
        self.normalize(parent);
        Ok(())
    }

    fn set_text_content(&mut self, node: NodeId, text: &str) -> Result<()> {
        if self.element(node).is_none() {
            return Err(doc_error("text content needs an element"));
        }
        for c in self.children(node) {
            self.get_mut(c)?.detach();
        }
        if !text.is_empty() {
            let t = self.create_text(text);
            self.get_mut(node)?.append_id(t);
        }
        Ok(())
    }

    fn elements_with_class(&self, root: NodeId, class: &str) -> Vec<NodeId> {
        let Some(start) = self.get(root) else {
            return Vec::new();
        };
        start
            .descendants()
            .skip(1)
            .map(|n| n.id())
            .filter(|n| self.has_class(*n, class))
            .collect()
    }

    fn attr(&self, node: NodeId, name: &str) -> Option<&str> {
        self.element(node)?
            .attrs
            .iter()
            .find(|(k, _)| is_plain_attr(k, name))
            .map(|(_, v)| &**v)
    }

    fn set_attr(&mut self, node: NodeId, name: &str, value: &str) -> Result<()> {
        let mut n = self.get_mut(node)?;
        let Node::Element(el) = n.value() else {
            return Err(doc_error("attributes need an element"));
        };
        let mut attrs: Vec<Attribute> = el
            .attrs
            .iter()
            .map(|(k, v)| Attribute {
                name: k.clone(),
                value: StrTendril::from_slice(v),
            })
            .collect();
        match attrs.iter_mut().find(|a| is_plain_attr(&a.name, name)) {
            Some(a) => a.value = StrTendril::from_slice(value),
            None => attrs.push(Attribute {
                name: plain_attr_name(&name.to_ascii_lowercase()),
                value: StrTendril::from_slice(value),
            }),
        }
        // `Element` caches its id and classes on first use, so it is rebuilt, not patched.
        *el = Element::new(el.name.clone(), attrs);
        Ok(())
    }

    fn scroll_into_view(&mut self, node: NodeId) {
        self.last_scrolled = Some(node);
    }

    fn text_content(&self, node: NodeId) -> String {
        let Some(start) = self.get(node) else {
            return String::new();
        };
        start
            .descendants()
            .filter_map(|n| n.value().as_text())
            .map(|t| &**t)
            .collect()
    }

    fn inner_text(&self, root: NodeId) -> String {
        let mut sink = TextSink::default();
        if let Some(start) = self.get(root) {
            render_into(start, false, &mut sink);
        }
        sink.finish()
    }
}
