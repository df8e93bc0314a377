//! Sanitization engine
//!
//! Rewrites an arbitrary source tree into the allow-listed subset described
//! by [`Policy`]. Every element gets exactly one disposition, in priority
//! order:
//!
//! 1. **Drop**: copied site chrome (see [`Policy::is_noise`]) disappears with
//!    its descendants
//! 2. **Keep**: allowed elements are rebuilt with only their allowed
//!    attributes, then their children are processed into the new element
//! 3. **Remove / unwrap**: dangerous elements disappear with their
//!    descendants; any other element is replaced by its children
//!
//! One structural heuristic applies on top: when the first element written
//! into the body would be a `<ul>`/`<ol>` without any `<li>` child, it is
//! clipboard noise from the source application and is unwrapped. The check
//! repeats for whatever becomes the first element next, so the output never
//! starts with such a list and sanitizing twice changes nothing.
//!
//! Text is copied verbatim, whitespace-only runs included. Trimming text
//! glues adjacent inline tokens together (`<b>a</b> <i>b</i>` → `ab`).
//!
//! Elements nested deeper than [`MAX_NESTING_DEPTH`] are not rebuilt: their
//! subtree is flattened to its text, minus removed and noise content.
//!
//! The engine is written against [`SourceNode`] and [`TreeBuilder`] so the
//! same code runs over html5ever handles and owned trees.

use crate::parser::{find_body, parse_html};
use crate::policy::{MAX_NESTING_DEPTH, Policy, SanitizeAction};
use crate::tree::{FragmentBuilder, Node, SourceKind, SourceNode, TreeBuilder, subtree_text};

/// Where output goes while walking the source tree
#[derive(Debug, Clone, Copy)]
struct Scope {
    /// Source depth of the node being processed
    depth: usize,
    /// The output parent is the body container itself
    at_root: bool,
}

impl Scope {
    const BODY: Scope = Scope {
        depth: 0,
        at_root: true,
    };

    /// Children of an unwrapped element land in the same output parent
    fn unwrapped(self) -> Self {
        Scope {
            depth: self.depth + 1,
            ..self
        }
    }

    /// Children of a kept element land inside it
    fn nested(self) -> Self {
        Scope {
            depth: self.depth + 1,
            at_root: false,
        }
    }
}

/// State shared by one sanitization pass
#[derive(Debug)]
struct Pass {
    /// No element has been written into the body container yet
    head_open: bool,
}

/// Allow-list sanitizer
#[derive(Debug, Clone, Copy)]
pub struct Sanitizer {
    policy: &'static Policy,
}

impl Sanitizer {
    /// Create a sanitizer using the publishing policy
    pub fn new() -> Self {
        Self {
            policy: Policy::publishing(),
        }
    }

    /// Sanitize a source tree into a new `<body>` container
    ///
    /// The returned container is not itself part of the output subset; its
    /// children are. Serialize it with [`Node::inner_html`] when using the
    /// [`FragmentBuilder`].
    pub fn sanitize<S, B>(&self, source: &S, builder: &mut B) -> B::Node
    where
        S: SourceNode,
        B: TreeBuilder,
    {
        let mut root = builder.create_element("body");
        let mut pass = Pass { head_open: true };
        self.process_node(source, &mut root, Scope::BODY, &mut pass, builder);
        root
    }

    /// Parse, sanitize and serialize clipboard HTML
    ///
    /// # Examples
    ///
    /// ```
    /// use markpaste::sanitizer::Sanitizer;
    ///
    /// let html = "<div><p>Hello</p><script>alert(1)</script><span>World</span></div>";
    /// let clean = Sanitizer::new().sanitize_html(html);
    /// assert_eq!(clean, "<p>Hello</p>World");
    /// ```
    pub fn sanitize_html(&self, html: &str) -> String {
        let dom = parse_html(html);
        let root = match find_body(&dom) {
            Some(body) => self.sanitize(&body, &mut FragmentBuilder),
            None => self.sanitize(&dom.document, &mut FragmentBuilder),
        };
        root.inner_html()
    }

    /// Process one source node into `parent`
    ///
    /// Returns whether an `<li>` was written directly into `parent`.
    fn process_node<S, B>(
        &self,
        node: &S,
        parent: &mut B::Node,
        scope: Scope,
        pass: &mut Pass,
        builder: &mut B,
    ) -> bool
    where
        S: SourceNode,
        B: TreeBuilder,
    {
        let tag = match node.kind() {
            SourceKind::Text(text) => {
                append_text(&text, parent, builder);
                return false;
            }
            SourceKind::Root => {
                return self.process_children(node, parent, scope.unwrapped(), pass, builder);
            }
            SourceKind::Ignored => return false,
            SourceKind::Element(tag) => tag.into_owned(),
        };

        if scope.depth > MAX_NESTING_DEPTH {
            tracing::trace!(tag = %tag, depth = scope.depth, "flattening deeply nested subtree");
            let text = subtree_text(node, |element| self.keeps_content(element));
            append_text(&text, parent, builder);
            return false;
        }

        if !self.keeps_content(node) {
            tracing::trace!(tag = %tag, "dropping removed or noise element");
            return false;
        }

        match self.policy.check_element(&tag) {
            SanitizeAction::Keep => {
                let Some(canonical) = self.policy.allowed_tag(&tag) else {
                    return false;
                };

                let at_head = scope.at_root && pass.head_open;
                let (element, has_items) = self.rebuild(node, canonical, scope, pass, builder);
                if at_head && matches!(canonical, "ul" | "ol") && !has_items {
                    tracing::debug!(tag = canonical, "unwrapping list without items at body start");
                    return self.process_children(node, parent, scope.unwrapped(), pass, builder);
                }

                if scope.at_root {
                    pass.head_open = false;
                }
                builder.append(parent, element);
                canonical == "li"
            }
            SanitizeAction::Remove => false,
            SanitizeAction::Unwrap => {
                self.process_children(node, parent, scope.unwrapped(), pass, builder)
            }
        }
    }

    /// Rebuild an allowed element with its allowed attributes and children
    fn rebuild<S, B>(
        &self,
        node: &S,
        canonical: &'static str,
        scope: Scope,
        pass: &mut Pass,
        builder: &mut B,
    ) -> (B::Node, bool)
    where
        S: SourceNode,
        B: TreeBuilder,
    {
        let mut element = builder.create_element(canonical);
        for attr in self.policy.allowed_attributes(canonical) {
            if let Some(value) = node.attribute(attr)
                && self.policy.permits_attribute(canonical, attr, &value)
            {
                builder.set_attribute(&mut element, attr, &value);
            }
        }

        let has_items = self.process_children(node, &mut element, scope.nested(), pass, builder);
        (element, has_items)
    }

    fn process_children<S, B>(
        &self,
        node: &S,
        parent: &mut B::Node,
        scope: Scope,
        pass: &mut Pass,
        builder: &mut B,
    ) -> bool
    where
        S: SourceNode,
        B: TreeBuilder,
    {
        let mut has_items = false;
        for child in node.children() {
            has_items |= self.process_node(&child, parent, scope, pass, builder);
        }
        has_items
    }

    /// False for dangerous elements and copied page chrome
    fn keeps_content<S: SourceNode>(&self, node: &S) -> bool {
        let Some(tag) = node.tag() else {
            return true;
        };
        if self.policy.is_dangerous(&tag) {
            return false;
        }
        let class = node.attribute("class");
        let href = node.attribute("href");
        !self
            .policy
            .is_noise(&tag, class.as_deref(), href.as_deref())
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new()
    }
}

fn append_text<B: TreeBuilder>(text: &str, parent: &mut B::Node, builder: &mut B) {
    if !text.is_empty() {
        let text = builder.create_text(text);
        builder.append(parent, text);
    }
}

/// Sanitize clipboard HTML with the publishing policy
pub fn sanitize_html(html: &str) -> String {
    Sanitizer::new().sanitize_html(html)
}

/// Copy a tree, removing only `style` attributes
///
/// Used when full cleaning is switched off: structure, scripts and every
/// other attribute are kept. Comments are dropped. Subtrees nested deeper
/// than [`MAX_NESTING_DEPTH`] are flattened to their text.
pub fn strip_presentation_tree<S, B>(source: &S, builder: &mut B) -> B::Node
where
    S: SourceNode,
    B: TreeBuilder,
{
    let mut root = builder.create_element("body");
    for child in source.children() {
        copy_without_style(&child, &mut root, 1, builder);
    }
    root
}

fn copy_without_style<S, B>(node: &S, parent: &mut B::Node, depth: usize, builder: &mut B)
where
    S: SourceNode,
    B: TreeBuilder,
{
    match node.kind() {
        SourceKind::Text(text) => {
            let text = builder.create_text(&text);
            builder.append(parent, text);
        }
        SourceKind::Element(_) if depth > MAX_NESTING_DEPTH => {
            append_text(&subtree_text(node, |_| true), parent, builder);
        }
        SourceKind::Element(tag) => {
            let mut element = builder.create_element(&tag);
            for (name, value) in node.attributes() {
                if !name.eq_ignore_ascii_case("style") {
                    builder.set_attribute(&mut element, &name, &value);
                }
            }
            for child in node.children() {
                copy_without_style(&child, &mut element, depth + 1, builder);
            }
            builder.append(parent, element);
        }
        SourceKind::Root => {
            for child in node.children() {
                copy_without_style(&child, parent, depth + 1, builder);
            }
        }
        SourceKind::Ignored => {}
    }
}

/// Parse clipboard HTML and strip only `style` attributes
///
/// # Examples
///
/// ```
/// use markpaste::sanitizer::strip_presentation;
///
/// let html = r#"<p style="color: red;" class="lead">Hello</p>"#;
/// assert_eq!(strip_presentation(html), r#"<p class="lead">Hello</p>"#);
/// ```
pub fn strip_presentation(html: &str) -> String {
    let dom = parse_html(html);
    let root: Node = match find_body(&dom) {
        Some(body) => strip_presentation_tree(&body, &mut FragmentBuilder),
        None => strip_presentation_tree(&dom.document, &mut FragmentBuilder),
    };
    root.inner_html()
}
