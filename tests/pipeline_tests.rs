//! End-to-end tests for the paste pipeline and the library entry point

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use markpaste::backend::{Footprint, SharedConverter, from_fn};
use markpaste::{
    ClipboardPayload, Config, ContentKind, ConversionError, ConversionOutcome, ConvertOptions,
    ConverterRegistry, Session, convert, convert_with,
};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn test_convert_html_with_default_converter() {
    let html = r#"<div class="post"><h2>Setup</h2><p>Run <code>cargo fmt</code> first.</p><ul><li>one</li><li>two</li></ul></div>"#;

    let markdown = convert(html, &ConvertOptions::default()).await.unwrap();
    assert_eq!(markdown, "## Setup\n\nRun `cargo fmt` first.\n\n- one\n- two\n");
}

#[tokio::test]
async fn test_convert_markdown_is_returned_unchanged() {
    let input = "# Title\n\n*already* markdown";

    assert_eq!(convert(input, &ConvertOptions::default()).await.unwrap(), input);

    let forced = ConvertOptions {
        is_markdown: Some(true),
        ..ConvertOptions::default()
    };
    assert_eq!(convert("<p>kept</p>", &forced).await.unwrap(), "<p>kept</p>");
}

#[tokio::test]
async fn test_convert_forced_html() {
    let options = ConvertOptions {
        is_markdown: Some(false),
        ..ConvertOptions::default()
    };

    assert_eq!(convert("plain words", &options).await.unwrap(), "plain words\n");
}

#[tokio::test]
async fn test_convert_with_named_converter() {
    let options = ConvertOptions {
        converter: Some("commonmark".to_string()),
        ..ConvertOptions::default()
    };

    let markdown = convert("<p><em>soft</em></p>", &options).await.unwrap();
    assert_eq!(markdown, "_soft_\n");
}

#[tokio::test]
async fn test_convert_without_cleaning_keeps_structure() {
    let options = ConvertOptions {
        clean: false,
        ..ConvertOptions::default()
    };

    let markdown = convert(r#"<p style="color:red">Hi <span>there</span></p>"#, &options)
        .await
        .unwrap();
    assert_eq!(markdown, "Hi there\n");
}

#[tokio::test]
async fn test_unknown_converter_lists_registered_names() {
    let options = ConvertOptions {
        converter: Some("nonexistent".to_string()),
        ..ConvertOptions::default()
    };

    let err = convert("<p>x</p>", &options).await.unwrap_err();
    assert!(matches!(err, ConversionError::UnknownConverter { .. }));
    assert_eq!(
        err.to_string(),
        "Unknown converter: nonexistent. Available converters: commonmark, gfm"
    );
}

#[tokio::test]
async fn test_convert_with_custom_registry() {
    let mut registry = ConverterRegistry::new();
    registry.register("shout", Footprint::Light, || async {
        Ok::<_, ConversionError>(from_fn(|html| Ok(html.to_uppercase())))
    });
    let options = ConvertOptions {
        converter: Some("shout".to_string()),
        ..ConvertOptions::default()
    };

    let output = convert_with(&registry, "<div><b>hey</b></div>", &options).await.unwrap();
    assert_eq!(output, "<B>HEY</B>");
}

fn registry_with_failing_backend() -> ConverterRegistry {
    let mut registry = ConverterRegistry::with_builtins(&Config::default());
    registry.register("broken", Footprint::Heavy, || async {
        Ok::<_, ConversionError>(from_fn(|_| {
            Err(ConversionError::failure("broken", "module trapped"))
        }))
    });
    registry
}

#[tokio::test]
async fn test_failing_backend_does_not_affect_others() {
    let session = Session::new(Arc::new(registry_with_failing_backend()), &Config::default());

    let outcome = session
        .handle_paste(&ClipboardPayload::html("<h1>Title</h1>"))
        .await;
    let results = &outcome.results;
    assert_eq!(results.len(), 3);
    assert_eq!(results.get("gfm"), Some(&ConversionOutcome::Markdown("# Title\n".to_string())));
    assert_eq!(
        results.get("commonmark"),
        Some(&ConversionOutcome::Markdown("# Title\n".to_string()))
    );
    assert_eq!(
        results.get("broken").unwrap().display_text("broken"),
        "Error converting with broken: module trapped"
    );
}

#[tokio::test]
async fn test_failed_load_is_skipped_and_not_retried() {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let mut registry = ConverterRegistry::with_builtins(&Config::default());
    registry.register("unavailable", Footprint::Heavy, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async {
            Err::<SharedConverter, _>(ConversionError::LoadFailure {
                name: "unavailable".to_string(),
                message: "module not found".to_string(),
            })
        }
    });
    let registry = Arc::new(registry);
    let session = Session::new(Arc::clone(&registry), &Config::default());

    let outcome = session.handle_paste(&ClipboardPayload::html("<p>x</p>")).await;
    assert_eq!(outcome.results.get("unavailable"), None);
    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.loading.is_empty());
    assert_eq!(
        registry.load_failure("unavailable").as_deref(),
        Some("module not found")
    );

    let again = session.handle_paste(&ClipboardPayload::html("<p>y</p>")).await;
    assert_eq!(again.results.len(), 2);
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rich_flavor_wins_over_markdown_looking_text() {
    let session = Session::from_config(&Config::default());
    let payload = ClipboardPayload {
        html: Some("<p># not a heading</p>".to_string()),
        text: Some("# not a heading".to_string()),
    };

    let outcome = session.handle_paste(&payload).await;
    assert_eq!(outcome.kind, ContentKind::Html);
    assert_eq!(outcome.html.as_deref(), Some("<p># not a heading</p>"));
}

#[tokio::test(start_paused = true)]
async fn test_heavy_backend_reloads_after_idle_reclaim() {
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);
    let mut registry = ConverterRegistry::with_builtins(&Config::default());
    registry.register("heavy", Footprint::Heavy, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        async { Ok::<_, ConversionError>(from_fn(|_| Ok("heavy output".to_string()))) }
    });
    let registry = Arc::new(registry);
    let config = Config::from_toml_str("[idle]\nthreshold_ms = 1000").unwrap();
    let session = Session::new(Arc::clone(&registry), &config);

    let first = session.handle_paste(&ClipboardPayload::html("<p>a</p>")).await;
    assert!(first.results.get("heavy").is_some_and(ConversionOutcome::is_success));
    assert_eq!(loads.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(!registry.is_loaded("heavy"));
    assert!(registry.is_loaded("gfm"));

    let second = session.handle_paste(&ClipboardPayload::html("<p>b</p>")).await;
    assert_eq!(
        second.results.get("heavy"),
        Some(&ConversionOutcome::Markdown("heavy output".to_string()))
    );
    assert_eq!(loads.load(Ordering::SeqCst), 2);
    assert_eq!(session.reclaimer().reclaim_count(), 1);
}
