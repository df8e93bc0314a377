//! MarkPaste CLI - convert clipboard HTML to Markdown.
//!
//! Reads HTML (or Markdown) from a file or stdin and prints the Markdown
//! produced by one converter, by every converter (`--all`), or only the
//! sanitized HTML (`--sanitize-only`).

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use markpaste::{
    ClipboardPayload, Config, ConfigError, ContentKind, ConversionError, ConvertOptions,
    ConverterRegistry, Session, convert_with, sanitize_html, strip_presentation,
};

/// Convert pasted HTML to Markdown.
#[derive(Parser)]
#[command(name = "markpaste", version, about)]
struct Cli {
    /// Input file; reads stdin when omitted or `-`.
    #[arg(value_name = "INPUT")]
    input: Option<PathBuf>,

    /// Converter to use (defaults to `converters.default` from the config).
    #[arg(short, long, env = "MARKPASTE_CONVERTER", conflicts_with = "all")]
    converter: Option<String>,

    /// Only strip `style` attributes instead of full sanitization.
    #[arg(long)]
    no_clean: bool,

    /// Treat the input as Markdown.
    #[arg(long, conflicts_with = "html")]
    markdown: bool,

    /// Treat the input as HTML.
    #[arg(long)]
    html: bool,

    /// Configuration file.
    #[arg(long, env = "MARKPASTE_CONFIG")]
    config: Option<PathBuf>,

    /// Print the sanitized HTML instead of Markdown.
    #[arg(long, conflicts_with = "all")]
    sanitize_only: bool,

    /// Run every converter and print each result under a heading.
    #[arg(long)]
    all: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn is_markdown(&self) -> Option<bool> {
        match (self.markdown, self.html) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("failed to read {path}: {source}")]
    Input {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Conversion(#[from] ConversionError),
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // --verbose enables DEBUG, otherwise use RUST_LOG or default to INFO
    let filter = if cli.verbose {
        EnvFilter::new("markpaste=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("markpaste=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if cli.no_clean {
        config.sanitizer.clean = false;
    }

    let input = read_input(cli.input.as_deref()).await?;

    if cli.sanitize_only {
        let html = if config.sanitizer.clean {
            sanitize_html(&input)
        } else {
            strip_presentation(&input)
        };
        println!("{html}");
        return Ok(());
    }

    let registry = Arc::new(ConverterRegistry::with_builtins(&config));

    if cli.all {
        let kind = match cli.is_markdown() {
            Some(true) => ContentKind::Markdown,
            Some(false) => ContentKind::Html,
            None => ClipboardPayload::text(input.as_str()).kind(),
        };
        // One-shot output lists every backend, so wait for all of them
        registry.load_all().await;
        let session = Session::new(registry, &config);
        let outcome = session.process(&input, kind).await;
        for (name, result) in &outcome.results.results {
            println!("## {name}\n\n{}", result.display_text(name).trim_end());
            println!();
        }
        // Give the detached equivalence diagnostic a chance to log
        tokio::task::yield_now().await;
        return Ok(());
    }

    let options = ConvertOptions {
        converter: Some(cli.converter.clone().unwrap_or(config.converters.default)),
        clean: config.sanitizer.clean,
        is_markdown: cli.is_markdown(),
    };
    let markdown = convert_with(&registry, &input, &options).await?;
    print!("{markdown}");
    Ok(())
}

async fn read_input(path: Option<&Path>) -> Result<String, CliError> {
    match path {
        Some(path) if path != Path::new("-") => {
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| CliError::Input {
                    path: path.display().to_string(),
                    source,
                })
        }
        _ => {
            let mut input = String::new();
            std::io::stdin()
                .read_to_string(&mut input)
                .map_err(|source| CliError::Input {
                    path: "stdin".to_string(),
                    source,
                })?;
            Ok(input)
        }
    }
}
