//! Orchestrator: runs every loaded converter against the same input
//!
//! Each `run_all` call carries a [`RequestToken`] taken from a monotonic
//! counter. Converters run concurrently and each one publishes its outcome to
//! the result board as soon as it completes, but only while its token is
//! still the latest one issued. A slow conversion for superseded input
//! therefore never overwrites the result for newer input; the underlying call
//! is not cancelled, its result is simply discarded.
//!
//! Failures are isolated per converter. An error (or a panic) inside one
//! backend becomes a [`ConversionOutcome::Failed`] for that slot and never
//! affects the others.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::join_all;

use crate::backend::Converter;
use crate::equivalence::EquivalenceChecker;
use crate::registry::ConverterRegistry;

/// Monotonic identifier of one conversion request
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestToken(u64);

impl RequestToken {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of one converter for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    Markdown(String),
    /// The converter failed; holds the failure message
    Failed(String),
}

impl ConversionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ConversionOutcome::Markdown(_))
    }

    pub fn markdown(&self) -> Option<&str> {
        match self {
            ConversionOutcome::Markdown(markdown) => Some(markdown),
            ConversionOutcome::Failed(_) => None,
        }
    }

    /// Text shown in the converter's output slot
    ///
    /// # Examples
    ///
    /// ```
    /// use markpaste::orchestrator::ConversionOutcome;
    ///
    /// let failed = ConversionOutcome::Failed("trap".to_string());
    /// assert_eq!(failed.display_text("wasm"), "Error converting with wasm: trap");
    /// ```
    pub fn display_text(&self, name: &str) -> String {
        match self {
            ConversionOutcome::Markdown(markdown) => markdown.clone(),
            ConversionOutcome::Failed(message) => {
                format!("Error converting with {name}: {message}")
            }
        }
    }
}

/// Outcomes of a single `run_all` call, keyed by converter name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResultSet {
    pub token: RequestToken,
    pub results: BTreeMap<String, ConversionOutcome>,
}

impl ConversionResultSet {
    pub fn get(&self, name: &str) -> Option<&ConversionOutcome> {
        self.results.get(name)
    }

    /// Successful outputs as `(name, markdown)`, in name order
    pub fn successes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.results
            .iter()
            .filter_map(|(name, outcome)| outcome.markdown().map(|markdown| (name.as_str(), markdown)))
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Drives the loaded converters and keeps the latest result per converter
pub struct Orchestrator {
    registry: Arc<ConverterRegistry>,
    tokens: AtomicU64,
    board: Mutex<BTreeMap<String, (RequestToken, ConversionOutcome)>>,
    equivalence: Option<EquivalenceChecker>,
}

impl Orchestrator {
    pub fn new(registry: Arc<ConverterRegistry>) -> Self {
        Self {
            registry,
            tokens: AtomicU64::new(0),
            board: Mutex::new(BTreeMap::new()),
            equivalence: None,
        }
    }

    /// Run the equivalence diagnostic after each conversion
    pub fn with_equivalence(mut self, checker: EquivalenceChecker) -> Self {
        self.equivalence = Some(checker);
        self
    }

    pub fn registry(&self) -> &Arc<ConverterRegistry> {
        &self.registry
    }

    /// Issue a new token; it supersedes every earlier one
    pub fn next_token(&self) -> RequestToken {
        RequestToken(self.tokens.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn latest_token(&self) -> Option<RequestToken> {
        match self.tokens.load(Ordering::SeqCst) {
            0 => None,
            value => Some(RequestToken(value)),
        }
    }

    pub fn is_current(&self, token: RequestToken) -> bool {
        self.latest_token() == Some(token)
    }

    /// Convert sanitized HTML with every loaded converter under a new token
    pub async fn run_all(&self, html: &str) -> ConversionResultSet {
        let token = self.next_token();
        self.run_all_with_token(token, html).await
    }

    /// Convert sanitized HTML with every loaded converter
    ///
    /// Converters that are not loaded are skipped. The returned set always
    /// holds every outcome; only outcomes for the latest token reach the
    /// board, and only those are compared by the equivalence diagnostic.
    pub async fn run_all_with_token(&self, token: RequestToken, html: &str) -> ConversionResultSet {
        let converters = self.registry.loaded();
        tracing::debug!(token = token.value(), converters = converters.len(), "running converters");

        let runs = converters.into_iter().map(|(name, converter)| async move {
            let outcome = self.run_one(token, &name, converter.as_ref(), html).await;
            (name, outcome)
        });
        let results = join_all(runs).await.into_iter().collect();

        let set = ConversionResultSet { token, results };
        if let Some(checker) = &self.equivalence
            && self.is_current(token)
        {
            checker.spawn(set.clone());
        }
        set
    }

    /// Convert with a single converter and publish the outcome under `token`
    ///
    /// Used for converters that finish loading after their request started.
    pub async fn run_one(
        &self,
        token: RequestToken,
        name: &str,
        converter: &dyn Converter,
        html: &str,
    ) -> ConversionOutcome {
        let outcome = run_isolated(name, converter, html).await;
        self.publish(token, name, &outcome);
        outcome
    }

    /// Publish Markdown input unchanged to every loaded converter's slot
    pub fn passthrough(&self, markdown: &str) -> ConversionResultSet {
        let token = self.next_token();
        self.passthrough_with_token(token, markdown)
    }

    /// [`passthrough`](Self::passthrough) under an existing token
    pub fn passthrough_with_token(&self, token: RequestToken, markdown: &str) -> ConversionResultSet {
        let results = self
            .registry
            .loaded()
            .into_iter()
            .map(|(name, _)| {
                let outcome = self.passthrough_one(token, &name, markdown);
                (name, outcome)
            })
            .collect();
        ConversionResultSet { token, results }
    }

    /// Publish Markdown input unchanged to one converter's slot
    pub fn passthrough_one(&self, token: RequestToken, name: &str, markdown: &str) -> ConversionOutcome {
        let outcome = ConversionOutcome::Markdown(markdown.to_string());
        self.publish(token, name, &outcome);
        outcome
    }

    /// Latest published outcome per converter
    pub fn published(&self) -> BTreeMap<String, ConversionOutcome> {
        self.board
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, (_, outcome))| (name.clone(), outcome.clone()))
            .collect()
    }

    /// Token under which `name`'s current outcome was published
    pub fn published_token(&self, name: &str) -> Option<RequestToken> {
        self.board
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|(token, _)| *token)
    }

    fn publish(&self, token: RequestToken, name: &str, outcome: &ConversionOutcome) -> bool {
        if !self.is_current(token) {
            tracing::debug!(token = token.value(), converter = %name, "discarding stale result");
            return false;
        }

        let mut board = self.board.lock().unwrap_or_else(PoisonError::into_inner);
        if board.get(name).is_some_and(|(published, _)| *published > token) {
            return false;
        }
        board.insert(name.to_string(), (token, outcome.clone()));
        true
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("latest_token", &self.latest_token())
            .field("equivalence", &self.equivalence.is_some())
            .finish()
    }
}

async fn run_isolated(name: &str, converter: &dyn Converter, html: &str) -> ConversionOutcome {
    match AssertUnwindSafe(converter.convert(html)).catch_unwind().await {
        Ok(Ok(markdown)) => ConversionOutcome::Markdown(markdown),
        Ok(Err(err)) => {
            tracing::warn!(converter = %name, error = %err, "converter failed");
            ConversionOutcome::Failed(err.slot_message())
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(converter = %name, %message, "converter panicked");
            ConversionOutcome::Failed(message)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "converter panicked".to_string()
    }
}
