//! HTML5 parser using html5ever
//!
//! Clipboard HTML is usually a fragment (`<meta charset='utf-8'><b>x</b>`),
//! sometimes a whole document. Either way it is parsed the way a browser
//! parses `innerHTML` of a fresh document: the input is wrapped in
//! `<!DOCTYPE html><html><body>…</body></html>` and handed to html5ever,
//! which repairs malformed markup according to the WHATWG algorithm.
//!
//! # Examples
//!
//! ```rust
//! use markpaste::parser::{parse_html, find_body};
//!
//! let dom = parse_html("<p>Hello");
//! let body = find_body(&dom).expect("html5ever always creates a body");
//! ```
//!
//! # Configuration
//!
//! The parser uses default html5ever configuration:
//! - **Scripting**: Enabled for tokenization only (`noscript` is raw text); nothing is executed
//! - **Error Handling**: Errors are collected but parsing continues
//! - **Tree Builder**: Uses RcDom for reference-counted DOM nodes

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use std::borrow::Cow;

use crate::policy::{MAX_NESTING_DEPTH, Policy};
use crate::tree::{Element, Node, SourceKind, SourceNode, subtree_text};

/// Parse clipboard HTML into a DOM tree
///
/// Never fails: html5ever accepts any input and repairs it.
pub fn parse_html(html: &str) -> RcDom {
    let document = format!("<!DOCTYPE html><html><body>{html}</body></html>");
    parse_document(RcDom::default(), Default::default()).one(document.as_str())
}

/// Locate the `<body>` element of a parsed document
pub fn find_body(dom: &RcDom) -> Option<Handle> {
    find_element(&dom.document, "body")
}

fn find_element(node: &Handle, tag: &str) -> Option<Handle> {
    if let NodeData::Element { ref name, .. } = node.data
        && name.local.as_ref() == tag
    {
        return Some(node.clone());
    }

    node.children
        .borrow()
        .iter()
        .find_map(|child| find_element(child, tag))
}

/// Copy a parsed subtree into an owned [`Node`]
///
/// Comments, doctypes and processing instructions are left out. Elements
/// nested deeper than [`MAX_NESTING_DEPTH`] below `source` become their
/// text, without script or style content.
pub fn to_node<S: SourceNode>(source: &S) -> Node {
    copy_node(source, 0)
}

fn copy_node<S: SourceNode>(source: &S, depth: usize) -> Node {
    match source.kind() {
        SourceKind::Text(text) => Node::Text(text.into_owned()),
        SourceKind::Element(_) if depth > MAX_NESTING_DEPTH => {
            let policy = Policy::publishing();
            Node::Text(subtree_text(source, |node| {
                !node.tag().is_some_and(|tag| policy.is_dangerous(&tag))
            }))
        }
        SourceKind::Element(tag) => {
            let mut element = Element::new(tag.into_owned());
            element.attrs = source.attributes();
            element.children = owned_children(source, depth);
            Node::Element(element)
        }
        SourceKind::Root | SourceKind::Ignored => {
            let mut root = Element::new("body");
            root.children = owned_children(source, depth);
            Node::Element(root)
        }
    }
}

fn owned_children<S: SourceNode>(source: &S, depth: usize) -> Vec<Node> {
    source
        .children()
        .iter()
        .filter(|child| !matches!(child.kind(), SourceKind::Ignored))
        .map(|child| copy_node(child, depth + 1))
        .collect()
}

/// Parse clipboard HTML straight into an owned `<body>` tree
pub fn parse_body(html: &str) -> Node {
    let dom = parse_html(html);
    match find_body(&dom) {
        Some(body) => to_node(&body),
        None => Node::Element(Element::new("body")),
    }
}

impl SourceNode for Handle {
    fn kind(&self) -> SourceKind<'_> {
        match self.data {
            NodeData::Document => SourceKind::Root,
            NodeData::Element { ref name, .. } => {
                SourceKind::Element(Cow::Borrowed(name.local.as_ref()))
            }
            NodeData::Text { ref contents } => {
                SourceKind::Text(Cow::Owned(contents.borrow().to_string()))
            }
            NodeData::Doctype { .. }
            | NodeData::Comment { .. }
            | NodeData::ProcessingInstruction { .. } => SourceKind::Ignored,
        }
    }

    fn attribute(&self, name: &str) -> Option<String> {
        if let NodeData::Element { ref attrs, .. } = self.data {
            attrs
                .borrow()
                .iter()
                .find(|attr| attr.name.local.as_ref() == name)
                .map(|attr| attr.value.to_string())
        } else {
            None
        }
    }

    fn attributes(&self) -> Vec<(String, String)> {
        if let NodeData::Element { ref attrs, .. } = self.data {
            attrs
                .borrow()
                .iter()
                .map(|attr| (attr.name.local.to_string(), attr.value.to_string()))
                .collect()
        } else {
            Vec::new()
        }
    }

    fn children(&self) -> Vec<Self> {
        self.children.borrow().clone()
    }
}
