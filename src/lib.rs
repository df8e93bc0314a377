//! MarkPaste - clipboard HTML to Markdown
//!
//! This library turns pasted rich text into a safe HTML subset and one or
//! more Markdown renderings.
//!
//! # Architecture
//!
//! The library is structured into several modules:
//! - `policy`: allow-list of elements, attributes and URL schemes
//! - `tree`: source/target node abstraction and the owned fragment tree
//! - `parser`: HTML5 parsing using html5ever
//! - `sanitizer`: allow-list tree rewriting and presentation stripping
//! - `classifier`: Markdown vs. HTML detection for clipboard payloads
//! - `backend`: the `Converter` capability every backend implements
//! - `converter`: built-in GFM and CommonMark converters
//! - `wasm`: converter hosted in a WebAssembly module
//! - `registry`: named converters with lazy asynchronous loading
//! - `orchestrator`: runs every loaded converter with failure isolation
//! - `equivalence`: diagnostic comparison of converter outputs
//! - `reclaimer`: disposes heavy converters after user inactivity
//! - `session`: the paste pipeline tying the above together
//! - `config`: TOML configuration
//!
//! # Example
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), markpaste::ConversionError> {
//! use markpaste::{ConvertOptions, convert};
//!
//! let html = r#"<div><h1>Notes</h1><p>Plain <em>and</em> simple</p></div>"#;
//! let markdown = convert(html, &ConvertOptions::default()).await?;
//! assert_eq!(markdown, "# Notes\n\nPlain *and* simple\n");
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod classifier;
pub mod config;
pub mod converter;
pub mod equivalence;
pub mod error;
pub mod orchestrator;
pub mod parser;
pub mod policy;
pub mod reclaimer;
pub mod registry;
pub mod sanitizer;
pub mod session;
pub mod tree;
pub mod wasm;

// Re-export main types for convenience
pub use backend::{Converter, Footprint, SharedConverter};
pub use classifier::{ClipboardPayload, ContentKind, looks_like_markdown};
pub use config::Config;
pub use converter::{MarkdownConverter, MarkdownFlavor};
pub use error::{ConfigError, ConversionError};
pub use orchestrator::{ConversionOutcome, ConversionResultSet, Orchestrator, RequestToken};
pub use registry::ConverterRegistry;
pub use sanitizer::{Sanitizer, sanitize_html, strip_presentation};
pub use session::{PasteOutcome, Session};

/// Options for [`convert`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Converter name; the GFM converter when unset
    pub converter: Option<String>,
    /// Full sanitization (`true`) or presentation stripping only
    pub clean: bool,
    /// Force the content kind; classified from the input when unset
    pub is_markdown: Option<bool>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            converter: None,
            clean: true,
            is_markdown: None,
        }
    }
}

/// Convert one input with the built-in converters
///
/// Markdown input (explicit, or as classified) is returned unchanged.
/// Anything else is sanitized (or only stripped of presentation attributes
/// when `clean` is false) and handed to the requested converter.
///
/// # Errors
///
/// - `ConversionError::UnknownConverter`: the requested converter does not
///   exist; the message lists the available ones
/// - any error raised by the converter itself
pub async fn convert(input: &str, options: &ConvertOptions) -> Result<String, ConversionError> {
    let registry = ConverterRegistry::with_builtins(&Config::default());
    convert_with(&registry, input, options).await
}

/// [`convert`] against a caller-owned registry
pub async fn convert_with(
    registry: &ConverterRegistry,
    input: &str,
    options: &ConvertOptions,
) -> Result<String, ConversionError> {
    let is_markdown = options
        .is_markdown
        .unwrap_or_else(|| looks_like_markdown(input, false));
    if is_markdown {
        return Ok(input.to_string());
    }

    let html = if options.clean {
        sanitize_html(input)
    } else {
        strip_presentation(input)
    };
    let name = options.converter.as_deref().unwrap_or(crate::registry::GFM);
    let converter = registry.get_converter(name).await?;
    converter.convert(&html).await
}
