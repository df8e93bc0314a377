//! Paste session: classifier → sanitizer → orchestrator
//!
//! A [`Session`] owns the pipeline state for one interactive user: the
//! orchestrator (and through it the registry), the idle reclaimer and the
//! sanitizer mode. Every paste records activity and arms the reclaimer on
//! first use.
//!
//! Loaded converters run right away. A converter that is absent (never
//! loaded, or reclaimed while idle) is loaded on a background task when its
//! load does not finish immediately; once it is ready it converts the latest
//! request and publishes under that request's token. A converter whose load
//! failed is not retried by later pastes.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;

use crate::backend::LoadFuture;
use crate::classifier::{ClipboardPayload, ContentKind};
use crate::config::Config;
use crate::equivalence::{EquivalenceChecker, PulldownRenderer};
use crate::orchestrator::{ConversionResultSet, Orchestrator, RequestToken};
use crate::reclaimer::IdleReclaimer;
use crate::registry::ConverterRegistry;
use crate::sanitizer::{Sanitizer, strip_presentation};

/// Everything produced for one paste
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasteOutcome {
    pub kind: ContentKind,
    /// Sanitized HTML preview; `None` for Markdown input
    pub html: Option<String>,
    pub results: ConversionResultSet,
    /// Converters still loading; their results arrive on the orchestrator's
    /// board when ready
    pub loading: Vec<String>,
}

#[derive(Debug, Clone)]
struct LastPaste {
    content: String,
    kind: ContentKind,
}

/// Prepared input of the latest request
#[derive(Debug)]
struct Request {
    token: RequestToken,
    kind: ContentKind,
    input: String,
}

type CurrentRequest = Arc<Mutex<Option<Arc<Request>>>>;
type LoadingSet = Arc<Mutex<BTreeSet<String>>>;

/// Interactive conversion session
#[derive(Debug)]
pub struct Session {
    orchestrator: Arc<Orchestrator>,
    reclaimer: IdleReclaimer,
    sanitizer: Sanitizer,
    clean: AtomicBool,
    last: Mutex<Option<LastPaste>>,
    current: CurrentRequest,
    loading: LoadingSet,
}

impl Session {
    /// Session over the built-in converters described by `config`
    pub fn from_config(config: &Config) -> Self {
        Self::new(Arc::new(ConverterRegistry::with_builtins(config)), config)
    }

    pub fn new(registry: Arc<ConverterRegistry>, config: &Config) -> Self {
        let mut orchestrator = Orchestrator::new(Arc::clone(&registry));
        if config.equivalence.enabled {
            orchestrator = orchestrator.with_equivalence(EquivalenceChecker::new(
                Arc::new(PulldownRenderer),
                config.equivalence.context_chars,
            ));
        }

        Self {
            orchestrator: Arc::new(orchestrator),
            reclaimer: IdleReclaimer::new(registry, config.idle.threshold()),
            sanitizer: Sanitizer::new(),
            clean: AtomicBool::new(config.sanitizer.clean),
            last: Mutex::new(None),
            current: Arc::new(Mutex::new(None)),
            loading: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    pub fn registry(&self) -> &Arc<ConverterRegistry> {
        self.orchestrator.registry()
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn reclaimer(&self) -> &IdleReclaimer {
        &self.reclaimer
    }

    pub fn is_clean(&self) -> bool {
        self.clean.load(Ordering::SeqCst)
    }

    /// Switch between full sanitization and presentation stripping
    pub fn set_clean(&self, clean: bool) {
        self.clean.store(clean, Ordering::SeqCst);
    }

    /// Whether `outcome` belongs to the most recent request
    pub fn is_current(&self, outcome: &PasteOutcome) -> bool {
        self.orchestrator.is_current(outcome.results.token)
    }

    /// Process one paste event
    pub async fn handle_paste(&self, payload: &ClipboardPayload) -> PasteOutcome {
        self.reclaimer.touch();
        self.reclaimer.arm();

        let kind = payload.kind();
        let content = payload.content();
        *self.last.lock().unwrap_or_else(PoisonError::into_inner) = Some(LastPaste {
            content: content.to_string(),
            kind,
        });

        self.process(content, kind).await
    }

    /// Re-run the last paste, e.g. after [`set_clean`](Self::set_clean)
    pub async fn reprocess(&self) -> Option<PasteOutcome> {
        let last = self
            .last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()?;
        self.reclaimer.touch();
        Some(self.process(&last.content, last.kind).await)
    }

    /// Run classified content through the pipeline
    ///
    /// Only converters that are loaded (or load without waiting) contribute
    /// to the returned set; see [`PasteOutcome::loading`].
    pub async fn process(&self, content: &str, kind: ContentKind) -> PasteOutcome {
        let token = self.orchestrator.next_token();
        let input = match kind {
            ContentKind::Markdown => content.to_string(),
            ContentKind::Html => self.prepare_html(content),
        };
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(Request {
            token,
            kind,
            input: input.clone(),
        }));

        let loading = self.start_loads();
        match kind {
            ContentKind::Markdown => PasteOutcome {
                kind,
                html: None,
                results: self.orchestrator.passthrough_with_token(token, &input),
                loading,
            },
            ContentKind::Html => {
                let results = self.orchestrator.run_all_with_token(token, &input).await;
                PasteOutcome {
                    kind,
                    html: Some(input),
                    results,
                    loading,
                }
            }
        }
    }

    /// Sanitize, or only strip presentation attributes when not in clean mode
    pub fn prepare_html(&self, html: &str) -> String {
        if self.is_clean() {
            self.sanitizer.sanitize_html(html)
        } else {
            strip_presentation(html)
        }
    }

    /// Load absent converters, returning the ones still loading
    ///
    /// A load that completes on its first poll is finished inline; the rest
    /// move to background tasks.
    fn start_loads(&self) -> Vec<String> {
        let registry = self.registry();
        let mut pending = Vec::new();

        for name in registry.unloaded() {
            let started = self
                .loading
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(name.clone());
            if !started {
                pending.push(name);
                continue;
            }

            let mut load: LoadFuture = {
                let registry = Arc::clone(registry);
                let name = name.clone();
                async move { registry.get_converter(&name).await }.boxed()
            };
            if (&mut load).now_or_never().is_some() {
                self.loading
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&name);
                continue;
            }

            tracing::debug!(converter = %name, "converter loading in background");
            pending.push(name.clone());
            tokio::spawn(finish_load(
                load,
                name,
                Arc::clone(&self.orchestrator),
                Arc::clone(&self.current),
                Arc::clone(&self.loading),
            ));
        }
        pending
    }
}

/// Await a background load, then convert the latest request with it
async fn finish_load(
    load: LoadFuture,
    name: String,
    orchestrator: Arc<Orchestrator>,
    current: CurrentRequest,
    loading: LoadingSet,
) {
    let result = load.await;
    loading
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&name);
    // A failed load is already logged and remembered by the registry
    let Ok(converter) = result else {
        return;
    };

    let request = current.lock().unwrap_or_else(PoisonError::into_inner).clone();
    let Some(request) = request else {
        return;
    };
    match request.kind {
        ContentKind::Markdown => {
            orchestrator.passthrough_one(request.token, &name, &request.input);
        }
        ContentKind::Html => {
            orchestrator
                .run_one(request.token, &name, converter.as_ref(), &request.input)
                .await;
        }
    }
}
