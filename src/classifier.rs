//! Content-kind classification for clipboard payloads
//!
//! A paste arrives as up to two flavors: rich text (HTML) and plain text.
//! The classifier decides whether the payload is already Markdown, in which
//! case sanitization and conversion are skipped, or HTML that must be
//! sanitized first.
//!
//! The rule is deliberately coarse:
//!
//! - a rich-text flavor always wins: the payload is HTML
//! - otherwise plain text is Markdown unless, once trimmed, it starts with `<`
//!
//! Markdown that legitimately opens with an HTML block is misclassified as
//! HTML. That is accepted.

/// Kind of content the pipeline will process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Already Markdown: passed through unchanged
    Markdown,
    /// HTML: sanitized, then converted
    Html,
}

/// Whether `text` should be treated as Markdown
///
/// # Examples
///
/// ```
/// use markpaste::classifier::looks_like_markdown;
///
/// assert!(looks_like_markdown("# Title", false));
/// assert!(!looks_like_markdown("  <p>Hi</p>", false));
/// assert!(!looks_like_markdown("# Title", true));
/// ```
pub fn looks_like_markdown(text: &str, has_rich_flavor: bool) -> bool {
    if has_rich_flavor {
        return false;
    }
    !text.trim().starts_with('<')
}

/// Both flavors of a single paste event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClipboardPayload {
    /// `text/html` flavor
    pub html: Option<String>,
    /// `text/plain` flavor
    pub text: Option<String>,
}

impl ClipboardPayload {
    pub fn html(html: impl Into<String>) -> Self {
        Self {
            html: Some(html.into()),
            text: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self {
            html: None,
            text: Some(text.into()),
        }
    }

    /// Content to process: the HTML flavor when present and non-empty,
    /// the plain text otherwise
    pub fn content(&self) -> &str {
        self.rich()
            .or(self.text.as_deref())
            .unwrap_or_default()
    }

    /// Classify this payload
    pub fn kind(&self) -> ContentKind {
        if looks_like_markdown(self.content(), self.rich().is_some()) {
            ContentKind::Markdown
        } else {
            ContentKind::Html
        }
    }

    fn rich(&self) -> Option<&str> {
        self.html.as_deref().filter(|html| !html.is_empty())
    }
}
