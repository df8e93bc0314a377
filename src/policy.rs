//! Allow-list policy for clipboard HTML
//!
//! Pasted HTML is untrusted: it may come from any web page or desktop
//! application and routinely carries scripts, styles, tracking markup and
//! site chrome. The policy describes the small "safe publishing" subset that
//! survives sanitization:
//!
//! 1. **Allowed elements**: block and inline elements with a Markdown
//!    equivalent (paragraphs, headings, lists, emphasis, code, tables, links)
//! 2. **Allowed attributes**: a per-element list, copied in declared order
//! 3. **Dangerous elements**: removed together with all their content
//! 4. **Noise rules**: site chrome copied by accident (copy buttons,
//!    interactive playground links) that is dropped outright
//! 5. **URL schemes**: `href` values with executable or local schemes are
//!    never copied
//!
//! The policy is static data. All decisions about tree shape live in
//! [`crate::sanitizer`].

/// Elements that survive sanitization
const ALLOWED_TAGS: &[&str] = &[
    "p",
    "strong",
    "b",
    "em",
    "i",
    "blockquote",
    "code",
    "pre",
    "a",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "ul",
    "ol",
    "li",
    "dl",
    "dt",
    "dd",
    "br",
    "hr",
    "table",
    "thead",
    "tbody",
    "tr",
    "th",
    "td",
];

/// Attributes copied per element, in output order
const ALLOWED_ATTRIBUTES: &[(&str, &[&str])] = &[("a", &["href", "title", "target"])];

/// Elements removed together with their descendants
const DANGEROUS_TAGS: &[&str] = &[
    "script", // JavaScript execution
    "style",  // CSS, never content
    "iframe", // Loads external documents
    "frame",  // Legacy framesets
    "object", // Plugins
    "embed",  // Plugins
    "link",   // External stylesheets
    "meta",   // Document metadata
];

/// Class names marking copied UI chrome rather than content
const NOISE_CLASSES: &[&str] = &["mdn-copy-button"];

/// Link targets that only make sense on their origin site
const NOISE_LINK_PREFIXES: &[&str] = &["https://developer.mozilla.org/en-US/play"];

/// URL schemes that are never copied into an `href`
const DANGEROUS_URL_SCHEMES: &[&str] = &[
    "javascript:", // JavaScript execution
    "vbscript:",   // VBScript execution (legacy IE)
    "data:",       // Inline documents
    "file:",       // Local file access
];

/// Maximum element nesting depth kept by the sanitizer and the converters
///
/// Deeper subtrees are flattened to their text. Browsers stop nesting at a
/// similar depth (Blink caps its parser at 512).
pub const MAX_NESTING_DEPTH: usize = 256;

/// Action to take for a source element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SanitizeAction {
    /// Rebuild the element with filtered attributes
    Keep,
    /// Drop the element but keep its children in place
    Unwrap,
    /// Drop the element and all its children
    Remove,
}

/// Static sanitization policy
#[derive(Debug)]
pub struct Policy {
    allowed_tags: &'static [&'static str],
    allowed_attributes: &'static [(&'static str, &'static [&'static str])],
    dangerous_tags: &'static [&'static str],
    noise_classes: &'static [&'static str],
    noise_link_prefixes: &'static [&'static str],
}

static PUBLISHING: Policy = Policy {
    allowed_tags: ALLOWED_TAGS,
    allowed_attributes: ALLOWED_ATTRIBUTES,
    dangerous_tags: DANGEROUS_TAGS,
    noise_classes: NOISE_CLASSES,
    noise_link_prefixes: NOISE_LINK_PREFIXES,
};

impl Policy {
    /// The process-wide publishing policy
    ///
    /// # Examples
    ///
    /// ```
    /// use markpaste::policy::{Policy, SanitizeAction};
    ///
    /// let policy = Policy::publishing();
    /// assert_eq!(policy.check_element("p"), SanitizeAction::Keep);
    /// assert_eq!(policy.check_element("div"), SanitizeAction::Unwrap);
    /// assert_eq!(policy.check_element("script"), SanitizeAction::Remove);
    /// ```
    pub fn publishing() -> &'static Policy {
        &PUBLISHING
    }

    /// Canonical (lowercase) name of an allowed tag, or `None`
    pub fn allowed_tag(&self, tag_name: &str) -> Option<&'static str> {
        self.allowed_tags
            .iter()
            .copied()
            .find(|allowed| allowed.eq_ignore_ascii_case(tag_name))
    }

    /// Attributes copied for `tag_name`, in declared order
    pub fn allowed_attributes(&self, tag_name: &str) -> &'static [&'static str] {
        self.allowed_attributes
            .iter()
            .find(|(tag, _)| tag.eq_ignore_ascii_case(tag_name))
            .map(|(_, attrs)| *attrs)
            .unwrap_or(&[])
    }

    /// Whether `tag_name` is on the dangerous set
    pub fn is_dangerous(&self, tag_name: &str) -> bool {
        self.dangerous_tags
            .iter()
            .any(|tag| tag.eq_ignore_ascii_case(tag_name))
    }

    /// Disposition of an element by tag alone
    pub fn check_element(&self, tag_name: &str) -> SanitizeAction {
        if self.allowed_tag(tag_name).is_some() {
            SanitizeAction::Keep
        } else if self.is_dangerous(tag_name) {
            SanitizeAction::Remove
        } else {
            SanitizeAction::Unwrap
        }
    }

    /// Whether an element is copied site chrome
    ///
    /// # Arguments
    ///
    /// * `tag_name` - The element's tag
    /// * `class` - Value of the `class` attribute, if any
    /// * `href` - Value of the `href` attribute, if any
    pub fn is_noise(&self, tag_name: &str, class: Option<&str>, href: Option<&str>) -> bool {
        if let Some(class) = class
            && class
                .split_ascii_whitespace()
                .any(|name| self.noise_classes.contains(&name))
        {
            return true;
        }

        tag_name.eq_ignore_ascii_case("a")
            && href.is_some_and(|href| {
                self.noise_link_prefixes
                    .iter()
                    .any(|prefix| href.starts_with(prefix))
            })
    }

    /// Check if a URL uses a dangerous scheme
    ///
    /// # Examples
    ///
    /// ```
    /// use markpaste::policy::Policy;
    ///
    /// let policy = Policy::publishing();
    /// assert!(policy.is_dangerous_url("javascript:alert('xss')"));
    /// assert!(policy.is_dangerous_url("  JavaScript:alert(1)"));
    /// assert!(!policy.is_dangerous_url("https://example.com"));
    /// assert!(!policy.is_dangerous_url("/relative/path"));
    /// ```
    pub fn is_dangerous_url(&self, url: &str) -> bool {
        let url_lower = url.trim().to_ascii_lowercase();
        DANGEROUS_URL_SCHEMES
            .iter()
            .any(|scheme| url_lower.starts_with(scheme))
    }

    /// Whether `attr` may be copied onto `tag_name` with `value`
    pub fn permits_attribute(&self, tag_name: &str, attr: &str, value: &str) -> bool {
        if !self.allowed_attributes(tag_name).contains(&attr) {
            return false;
        }
        !(attr == "href" && self.is_dangerous_url(value))
    }
}
