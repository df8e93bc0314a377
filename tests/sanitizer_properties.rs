//! Property tests for the sanitization engine
//!
//! Trees are generated directly as owned nodes so the properties exercise
//! the engine itself rather than the HTML parser's error recovery. One
//! property also goes through html5ever with token soup.

use markpaste::parser::parse_body;
use markpaste::policy::Policy;
use markpaste::sanitizer::{Sanitizer, sanitize_html};
use markpaste::tree::{Element, FragmentBuilder, Node};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

const DANGEROUS: &[&str] = &["script", "style", "iframe", "object", "embed", "meta"];
const ALLOWED: &[&str] = &["p", "b", "em", "a", "code", "blockquote", "h2", "li", "table", "tr", "td"];
const WRAPPERS: &[&str] = &["div", "span", "section", "font", "article"];
const LISTS: &[&str] = &["ul", "ol"];

fn arb_attrs() -> impl Strategy<Value = Vec<(&'static str, String)>> {
    prop::collection::vec(
        (
            prop::sample::select(vec!["href", "title", "target", "style", "onclick", "id"]),
            "[a-z:/ ]{0,12}",
        ),
        0..3,
    )
}

fn arb_tree(tags: Vec<&'static str>) -> impl Strategy<Value = Node> {
    let leaf = "[a-zA-Z <>&]{0,8}".prop_map(Node::text);
    leaf.prop_recursive(4, 64, 6, move |inner| {
        (
            prop::sample::select(tags.clone()),
            arb_attrs(),
            prop::collection::vec(inner, 0..6),
        )
            .prop_map(|(tag, attrs, children)| {
                let mut element = Element::new(tag);
                for (name, value) in attrs {
                    element = element.with_attr(name, value);
                }
                for child in children {
                    element = element.with_child(child);
                }
                Node::Element(element)
            })
    })
}

fn arb_body(tags: Vec<&'static str>) -> impl Strategy<Value = Node> {
    prop::collection::vec(arb_tree(tags), 0..5).prop_map(|children| {
        let mut body = Element::new("body");
        body.children = children;
        Node::Element(body)
    })
}

fn all_tags() -> Vec<&'static str> {
    [DANGEROUS, ALLOWED, WRAPPERS, LISTS].concat()
}

fn sanitize(body: &Node) -> Node {
    Sanitizer::new().sanitize(&body, &mut FragmentBuilder)
}

fn elements(node: &Node) -> Vec<&Element> {
    let mut found = Vec::new();
    let mut stack = vec![node];
    while let Some(node) = stack.pop() {
        if let Node::Element(element) = node {
            found.push(element);
            stack.extend(element.children.iter());
        }
    }
    found
}

proptest! {
    #[test]
    fn prop_dangerous_elements_never_emitted(body in arb_body(all_tags())) {
        let policy = Policy::publishing();
        let output = sanitize(&body);

        for element in elements(&output).into_iter().skip(1) {
            prop_assert!(!policy.is_dangerous(&element.tag), "emitted <{}>", element.tag);
            prop_assert!(policy.allowed_tag(&element.tag).is_some(), "emitted <{}>", element.tag);
        }
    }

    #[test]
    fn prop_attributes_follow_allow_list(body in arb_body(all_tags())) {
        let policy = Policy::publishing();
        let output = sanitize(&body);

        for element in elements(&output).into_iter().skip(1) {
            let allowed = policy.allowed_attributes(&element.tag);
            for (name, value) in &element.attrs {
                prop_assert!(allowed.contains(&name.as_str()), "<{} {}>", element.tag, name);
                if name == "href" {
                    prop_assert!(!policy.is_dangerous_url(value));
                }
            }
        }
    }

    #[test]
    fn prop_sanitize_is_idempotent(body in arb_body(all_tags())) {
        let once = sanitize(&body);
        let twice = sanitize(&once);
        prop_assert_eq!(twice.inner_html(), once.inner_html());
    }

    #[test]
    fn prop_unwrap_keeps_all_text_in_order(
        body in arb_body([ALLOWED, WRAPPERS, LISTS].concat())
    ) {
        prop_assert_eq!(sanitize(&body).text_content(), body.text_content());
    }

    #[test]
    fn prop_token_soup_never_yields_dangerous_markup(
        tokens in prop::collection::vec(
            prop::sample::select(vec![
                "<script>", "</script>", "<style>", "</style>", "<iframe>", "<div>",
                "</div>", "<p>", "</p>", "<ul>", "<li>", "<a href=javascript:x()>",
                "</a>", "<object>", "<embed>", "<meta>", "text", " ", "<b>", "</b>",
            ]),
            0..40,
        )
    ) {
        let policy = Policy::publishing();
        let clean = sanitize_html(&tokens.concat());

        for element in elements(&parse_body(&clean)).into_iter().skip(1) {
            prop_assert!(!policy.is_dangerous(&element.tag), "emitted <{}>", element.tag);
        }
        prop_assert!(!clean.contains("javascript:"));
    }
}

#[test]
fn test_unwrap_preserves_order_and_drops_wrappers() {
    let body: Node = Element::new("body")
        .with_child(
            Element::new("div")
                .with_child("one ")
                .with_child(Element::new("span").with_child("two "))
                .with_child(Element::new("p").with_child("three"))
                .with_child(Element::new("font").with_child(" four")),
        )
        .with_child(" five")
        .into();

    let output = sanitize(&body);
    assert_eq!(output.inner_html(), "one two <p>three</p> four five");
}

#[test]
fn test_nested_orphan_lists_settle_in_one_pass() {
    let body: Node = Element::new("body")
        .with_child(Element::new("ul").with_child(Element::new("ul").with_child("x")))
        .into();

    let once = sanitize(&body);
    assert_eq!(once.inner_html(), "x");
    assert_eq!(sanitize(&once), once);
}

#[test]
fn test_orphan_list_only_at_body_start() {
    let orphan = || Element::new("ul").with_child("loose");

    let first: Node = Element::new("body").with_child(orphan()).into();
    assert_eq!(sanitize(&first).inner_html(), "loose");

    let nested: Node = Element::new("body")
        .with_child(Element::new("blockquote").with_child(Element::new("blockquote").with_child(orphan())))
        .into();
    assert_eq!(
        sanitize(&nested).inner_html(),
        "<blockquote><blockquote><ul>loose</ul></blockquote></blockquote>"
    );
}
