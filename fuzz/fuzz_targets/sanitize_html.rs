#![no_main]

use libfuzzer_sys::fuzz_target;
use markpaste::parser::parse_body;
use markpaste::policy::Policy;
use markpaste::sanitizer::sanitize_html;
use markpaste::tree::Node;

fn assert_no_dangerous(node: &Node, policy: &Policy) {
    if let Some(element) = node.as_element() {
        assert!(
            !policy.is_dangerous(&element.tag),
            "dangerous <{}> in sanitized output",
            element.tag
        );
        for child in &element.children {
            assert_no_dangerous(child, policy);
        }
    }
}

fuzz_target!(|data: &[u8]| {
    let Ok(html) = std::str::from_utf8(data) else {
        return;
    };

    let clean = sanitize_html(html);
    assert_no_dangerous(&parse_body(&clean), Policy::publishing());
});
