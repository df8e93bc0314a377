//! Equivalence diagnostic between converter outputs
//!
//! After a conversion, every pair of successful outputs is rendered back to
//! HTML and compared exactly. A mismatch is logged with the character index
//! of the first divergence and a bounded window of context on each side.
//!
//! The check is purely diagnostic: it runs as a detached task, never feeds
//! back into the result set, and swallows its own failures (including a
//! panicking renderer).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use pulldown_cmark::{Options, Parser, html};
use tokio::task::JoinHandle;

use crate::orchestrator::ConversionResultSet;

/// Markdown → HTML renderer used for comparison
pub trait MarkdownRenderer: Send + Sync {
    fn render(&self, markdown: &str) -> String;
}

/// pulldown-cmark renderer with the GFM table and strikethrough extensions
#[derive(Debug, Clone, Copy, Default)]
pub struct PulldownRenderer;

impl MarkdownRenderer for PulldownRenderer {
    fn render(&self, markdown: &str) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);

        let parser = Parser::new_ext(markdown, options);
        let mut output = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut output, parser);
        output
    }
}

/// First point where two rendered outputs differ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Divergence {
    /// Character index of the first differing character
    pub index: usize,
    /// Context around `index` in the left output
    pub left: String,
    /// Context around `index` in the right output
    pub right: String,
}

/// Compare two strings exactly
///
/// Returns `None` when they are identical. The context windows span
/// `context_chars` characters on each side of the divergence.
///
/// # Examples
///
/// ```
/// use markpaste::equivalence::compare;
///
/// let divergence = compare("<p>hello</p>", "<p>help</p>", 2).unwrap();
/// assert_eq!(divergence.index, 6);
/// assert_eq!(divergence.left, "ello");
/// assert_eq!(divergence.right, "elp<");
/// ```
pub fn compare(left: &str, right: &str, context_chars: usize) -> Option<Divergence> {
    if left == right {
        return None;
    }

    let index = left
        .chars()
        .zip(right.chars())
        .take_while(|(a, b)| a == b)
        .count();
    let start = index.saturating_sub(context_chars);
    let window = |text: &str| -> String {
        text.chars()
            .skip(start)
            .take(index - start + context_chars)
            .collect()
    };

    Some(Divergence {
        index,
        left: window(left),
        right: window(right),
    })
}

/// Outcome of comparing one pair of converter outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EquivalenceReport {
    pub left: String,
    pub right: String,
    pub divergence: Option<Divergence>,
}

/// Renders and compares successful converter outputs
#[derive(Clone)]
pub struct EquivalenceChecker {
    renderer: Arc<dyn MarkdownRenderer>,
    context_chars: usize,
}

impl EquivalenceChecker {
    pub fn new(renderer: Arc<dyn MarkdownRenderer>, context_chars: usize) -> Self {
        Self {
            renderer,
            context_chars,
        }
    }

    /// Compare every pair of successful outputs
    ///
    /// Fewer than two successes produce no reports.
    pub fn check(&self, results: &ConversionResultSet) -> Vec<EquivalenceReport> {
        let rendered: Vec<(&str, String)> = results
            .successes()
            .map(|(name, markdown)| (name, self.renderer.render(markdown)))
            .collect();

        let mut reports = Vec::new();
        for (i, (left_name, left)) in rendered.iter().enumerate() {
            for (right_name, right) in &rendered[i + 1..] {
                reports.push(EquivalenceReport {
                    left: left_name.to_string(),
                    right: right_name.to_string(),
                    divergence: compare(left, right, self.context_chars),
                });
            }
        }
        reports
    }

    /// Run [`check`](Self::check) on a detached task and log the outcome
    ///
    /// Returns `None` when there is nothing to compare or no runtime to
    /// spawn on.
    pub fn spawn(&self, results: ConversionResultSet) -> Option<JoinHandle<()>> {
        if results.successes().nth(1).is_none() {
            return None;
        }
        let runtime = tokio::runtime::Handle::try_current().ok()?;
        let checker = self.clone();

        Some(runtime.spawn(async move {
            let token = results.token;
            let check = AssertUnwindSafe(async { checker.check(&results) }).catch_unwind();
            match check.await {
                Ok(reports) => log_reports(token.value(), &reports),
                Err(_) => tracing::warn!(token = token.value(), "equivalence check panicked"),
            }
        }))
    }
}

fn log_reports(token: u64, reports: &[EquivalenceReport]) {
    for report in reports {
        match &report.divergence {
            None => tracing::debug!(
                token,
                left = %report.left,
                right = %report.right,
                "converter outputs render identically"
            ),
            Some(divergence) => tracing::warn!(
                token,
                left = %report.left,
                right = %report.right,
                index = divergence.index,
                left_context = %divergence.left,
                right_context = %divergence.right,
                "converter outputs render differently"
            ),
        }
    }
}

impl Default for EquivalenceChecker {
    fn default() -> Self {
        Self::new(Arc::new(PulldownRenderer), 40)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{ConversionOutcome, RequestToken};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn result_set(entries: &[(&str, ConversionOutcome)]) -> ConversionResultSet {
        ConversionResultSet {
            token: RequestToken::new(1),
            results: entries
                .iter()
                .map(|(name, outcome)| (name.to_string(), outcome.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn test_compare_identical() {
        assert_eq!(compare("<p>a</p>", "<p>a</p>", 40), None);
    }

    #[test]
    fn test_compare_prefix() {
        let divergence = compare("abc", "abcdef", 40).unwrap();
        assert_eq!(divergence.index, 3);
        assert_eq!(divergence.left, "abc");
        assert_eq!(divergence.right, "abcdef");
    }

    #[test]
    fn test_compare_context_is_bounded() {
        let left = format!("{}X{}", "a".repeat(100), "b".repeat(100));
        let right = format!("{}Y{}", "a".repeat(100), "b".repeat(100));

        let divergence = compare(&left, &right, 5).unwrap();
        assert_eq!(divergence.index, 100);
        assert_eq!(divergence.left, "aaaaaXbbbb");
        assert_eq!(divergence.right, "aaaaaYbbbb");
    }

    #[test]
    fn test_compare_counts_characters_not_bytes() {
        let divergence = compare("ééa", "ééb", 1).unwrap();
        assert_eq!(divergence.index, 2);
        assert_eq!(divergence.left, "éa");
    }

    #[test]
    fn test_emphasis_styles_render_identically() {
        let renderer = PulldownRenderer;
        assert_eq!(renderer.render("*a* **b**"), renderer.render("_a_ **b**"));
    }

    #[test]
    fn test_check_pairs_successes_only() {
        let checker = EquivalenceChecker::default();
        let results = result_set(&[
            ("commonmark", ConversionOutcome::Markdown("Hello _world_\n".to_string())),
            ("gfm", ConversionOutcome::Markdown("Hello *world*\n".to_string())),
            ("wasm", ConversionOutcome::Failed("trap".to_string())),
        ]);

        let reports = checker.check(&results);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].left, "commonmark");
        assert_eq!(reports[0].right, "gfm");
        assert_eq!(reports[0].divergence, None);
    }

    #[test]
    fn test_check_reports_divergence() {
        let checker = EquivalenceChecker::default();
        let results = result_set(&[
            ("a", ConversionOutcome::Markdown("# Title\n".to_string())),
            ("b", ConversionOutcome::Markdown("## Title\n".to_string())),
        ]);

        let reports = checker.check(&results);
        let divergence = reports[0].divergence.as_ref().unwrap();
        assert_eq!(divergence.index, 2);
    }

    struct PanickingRenderer;

    impl MarkdownRenderer for PanickingRenderer {
        fn render(&self, _markdown: &str) -> String {
            panic!("renderer exploded");
        }
    }

    #[tokio::test]
    async fn test_spawned_check_swallows_panics() {
        let checker = EquivalenceChecker::new(Arc::new(PanickingRenderer), 40);
        let results = result_set(&[
            ("a", ConversionOutcome::Markdown("x".to_string())),
            ("b", ConversionOutcome::Markdown("y".to_string())),
        ]);

        let handle = checker.spawn(results).unwrap();
        assert!(handle.await.is_ok());
    }

    #[tokio::test]
    async fn test_spawn_needs_two_successes() {
        let checker = EquivalenceChecker::default();
        let results = result_set(&[("a", ConversionOutcome::Markdown("x".to_string()))]);
        assert!(checker.spawn(results).is_none());
    }
}
