//! Node abstractions shared by the parser, the sanitizer and the converters
//!
//! The sanitizer is written once against two capabilities:
//!
//! - [`SourceNode`]: a read-only view over a parsed tree (an html5ever
//!   `RcDom` handle, or an owned [`Node`])
//! - [`TreeBuilder`]: the construction primitives for the output tree
//!
//! [`FragmentBuilder`] builds owned [`Node`] trees, which serialize back to
//! HTML with [`Node::inner_html`].

use std::borrow::Cow;

/// What a source node is, as far as tree rewriting cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind<'a> {
    /// Character data
    Text(Cow<'a, str>),
    /// Element with its tag name
    Element(Cow<'a, str>),
    /// Document or fragment root; only its children matter
    Root,
    /// Comments, doctypes, processing instructions
    Ignored,
}

/// Read-only view over a parsed tree
pub trait SourceNode: Sized + Clone {
    /// Kind of this node
    fn kind(&self) -> SourceKind<'_>;
    /// Value of an attribute, if present (elements only)
    fn attribute(&self, name: &str) -> Option<String>;
    /// All attributes in source order (elements only)
    fn attributes(&self) -> Vec<(String, String)>;
    /// Child nodes in document order
    fn children(&self) -> Vec<Self>;

    /// Tag name when this node is an element
    fn tag(&self) -> Option<String> {
        match self.kind() {
            SourceKind::Element(tag) => Some(tag.into_owned()),
            _ => None,
        }
    }
}

/// Construction primitives for an output tree
pub trait TreeBuilder {
    type Node;

    /// Create an empty element
    fn create_element(&mut self, tag: &str) -> Self::Node;
    /// Set an attribute on an element created by this builder
    fn set_attribute(&mut self, element: &mut Self::Node, name: &str, value: &str);
    /// Create a text node
    fn create_text(&mut self, text: &str) -> Self::Node;
    /// Append `child` as the last child of `parent`
    fn append(&mut self, parent: &mut Self::Node, child: Self::Node);
}

/// Owned element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.push((name.into(), value.into()));
        self
    }

    pub fn with_child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    /// Concatenated text of all descendants
    pub fn text_content(&self) -> String {
        self.children
            .iter()
            .map(|child| subtree_text(&child, |_| true))
            .collect()
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Owned tree node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Text(String),
    Element(Element),
}

impl Node {
    pub fn text(content: impl Into<String>) -> Self {
        Node::Text(content.into())
    }

    /// Serialize the children of this node as HTML
    ///
    /// Follows the html5ever serializer: void elements have no end tag,
    /// raw-text elements are not escaped, and a leading newline inside
    /// `pre`/`textarea`/`listing` is doubled so that reparsing keeps it.
    pub fn inner_html(&self) -> String {
        let mut output = String::new();
        if let Node::Element(element) = self {
            serialize_children(element, &mut output);
        }
        output
    }

    /// Concatenated text of this node and its descendants
    pub fn text_content(&self) -> String {
        subtree_text(&self, |_| true)
    }

    /// Deepest element nesting below this node; the node itself is level 0
    pub fn depth(&self) -> usize {
        let mut deepest = 0;
        let mut stack = vec![(self, 0)];
        while let Some((node, depth)) = stack.pop() {
            if let Node::Element(element) = node {
                deepest = deepest.max(depth);
                stack.extend(element.children.iter().map(|child| (child, depth + 1)));
            }
        }
        deepest
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Node::Element(element) => Some(element),
            Node::Text(_) => None,
        }
    }
}

impl From<Element> for Node {
    fn from(element: Element) -> Self {
        Node::Element(element)
    }
}

impl From<&str> for Node {
    fn from(text: &str) -> Self {
        Node::Text(text.to_string())
    }
}

impl<'a> SourceNode for &'a Node {
    fn kind(&self) -> SourceKind<'_> {
        match self {
            Node::Text(text) => SourceKind::Text(Cow::Borrowed(text.as_str())),
            Node::Element(element) => SourceKind::Element(Cow::Borrowed(element.tag.as_str())),
        }
    }

    fn attribute(&self, name: &str) -> Option<String> {
        self.as_element()
            .and_then(|element| element.attr(name))
            .map(str::to_string)
    }

    fn attributes(&self) -> Vec<(String, String)> {
        self.as_element()
            .map(|element| element.attrs.clone())
            .unwrap_or_default()
    }

    fn children(&self) -> Vec<Self> {
        let node: &'a Node = *self;
        match node {
            Node::Element(element) => element.children.iter().collect(),
            Node::Text(_) => Vec::new(),
        }
    }
}

/// Builds owned [`Node`] trees
#[derive(Debug, Default)]
pub struct FragmentBuilder;

impl TreeBuilder for FragmentBuilder {
    type Node = Node;

    fn create_element(&mut self, tag: &str) -> Node {
        Node::Element(Element::new(tag))
    }

    fn set_attribute(&mut self, element: &mut Node, name: &str, value: &str) {
        if let Node::Element(element) = element {
            match element.attrs.iter_mut().find(|(key, _)| key == name) {
                Some(slot) => slot.1 = value.to_string(),
                None => element.attrs.push((name.to_string(), value.to_string())),
            }
        }
    }

    fn create_text(&mut self, text: &str) -> Node {
        Node::Text(text.to_string())
    }

    fn append(&mut self, parent: &mut Node, child: Node) {
        if let Node::Element(parent) = parent {
            // Adjacent text merges, as in a live DOM after normalization
            if let (Node::Text(incoming), Some(Node::Text(last))) =
                (&child, parent.children.last_mut())
            {
                last.push_str(incoming);
                return;
            }
            parent.children.push(child);
        }
    }
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "basefont", "bgsound", "br", "col", "embed", "frame", "hr", "img", "input",
    "keygen", "link", "meta", "param", "source", "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &[
    "style",
    "script",
    "xmp",
    "iframe",
    "noembed",
    "noframes",
    "plaintext",
    "noscript",
];

fn serialize_children(element: &Element, output: &mut String) {
    let tag = element.tag.to_ascii_lowercase();
    let raw = RAW_TEXT_ELEMENTS.contains(&tag.as_str());

    if matches!(tag.as_str(), "pre" | "textarea" | "listing")
        && let Some(Node::Text(first)) = element.children.first()
        && first.starts_with('\n')
    {
        output.push('\n');
    }

    for child in &element.children {
        serialize_node(child, raw, output);
    }
}

fn serialize_node(node: &Node, raw_text: bool, output: &mut String) {
    match node {
        Node::Text(text) if raw_text => output.push_str(text),
        Node::Text(text) => escape_text(text, output),
        Node::Element(element) => {
            let tag = element.tag.to_ascii_lowercase();
            output.push('<');
            output.push_str(&tag);
            for (name, value) in &element.attrs {
                output.push(' ');
                output.push_str(name);
                output.push_str("=\"");
                escape_attribute(value, output);
                output.push('"');
            }
            output.push('>');

            if VOID_ELEMENTS.contains(&tag.as_str()) {
                return;
            }

            serialize_children(element, output);
            output.push_str("</");
            output.push_str(&tag);
            output.push('>');
        }
    }
}

fn escape_text(text: &str, output: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => output.push_str("&amp;"),
            '\u{a0}' => output.push_str("&nbsp;"),
            '<' => output.push_str("&lt;"),
            '>' => output.push_str("&gt;"),
            _ => output.push(ch),
        }
    }
}

fn escape_attribute(value: &str, output: &mut String) {
    for ch in value.chars() {
        match ch {
            '&' => output.push_str("&amp;"),
            '\u{a0}' => output.push_str("&nbsp;"),
            '"' => output.push_str("&quot;"),
            _ => output.push(ch),
        }
    }
}

/// Text of a subtree in document order, walked without recursion
///
/// Elements for which `enter` returns false contribute nothing.
pub fn subtree_text<S, F>(root: &S, enter: F) -> String
where
    S: SourceNode,
    F: Fn(&S) -> bool,
{
    let mut output = String::new();
    let mut stack = vec![root.clone()];
    while let Some(node) = stack.pop() {
        match node.kind() {
            SourceKind::Text(text) => output.push_str(&text),
            SourceKind::Element(_) | SourceKind::Root if enter(&node) => {
                stack.extend(node.children().into_iter().rev());
            }
            _ => {}
        }
    }
    output
}
