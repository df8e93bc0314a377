//! Converter registry
//!
//! Maps converter names to descriptors. A descriptor owns an asynchronous
//! factory and a slot holding the loaded converter, if any:
//!
//! - `get_converter` fills an empty slot by awaiting the factory; callers
//!   arriving while a load is in flight wait for it instead of loading twice
//! - `dispose` empties a slot and releases the converter's resources
//! - `loaded` snapshots the filled slots; slots that are mid-load are skipped
//! - a failed load is remembered, so callers that only want what is available
//!   (see [`ConverterRegistry::unloaded`]) do not retry it on every request
//!
//! Every slot mutation happens with the slot's lock held, so a converter is
//! never observed half-removed or half-loaded.
//!
//! The registry is an explicit resource manager: the orchestrator, the idle
//! reclaimer and the library entry point all receive it by reference.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError};

use futures::future::join_all;
use tokio::sync::Mutex;

use crate::backend::{ConverterFactory, Footprint, SharedConverter};
use crate::config::Config;
use crate::converter::{MarkdownConverter, MarkdownFlavor};
use crate::error::{ConversionError, ConverterNames};
use crate::wasm::WasmConverter;

/// Name of the built-in GitHub Flavored Markdown converter
pub const GFM: &str = "gfm";
/// Name of the built-in CommonMark converter
pub const COMMONMARK: &str = "commonmark";
/// Name of the WebAssembly converter
pub const WASM: &str = "wasm";

struct Descriptor {
    footprint: Footprint,
    factory: Box<dyn ConverterFactory>,
    slot: Mutex<Option<SharedConverter>>,
    /// Message of the last failed load; cleared by a successful one
    failure: std::sync::Mutex<Option<String>>,
}

impl Descriptor {
    fn set_failure(&self, failure: Option<String>) {
        *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = failure;
    }

    fn failure(&self) -> Option<String> {
        self.failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Registry of named converters
#[derive(Default)]
pub struct ConverterRegistry {
    descriptors: BTreeMap<String, Descriptor>,
}

impl ConverterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in converters
    ///
    /// `gfm` and `commonmark` are always present; `wasm` is registered when
    /// `converters.wasm_module` is configured.
    pub fn with_builtins(config: &Config) -> Self {
        let mut registry = Self::new();
        registry.register(GFM, Footprint::Light, || async {
            Ok::<SharedConverter, ConversionError>(Arc::new(MarkdownConverter::new(
                MarkdownFlavor::Gfm,
            )))
        });
        registry.register(COMMONMARK, Footprint::Light, || async {
            Ok::<SharedConverter, ConversionError>(Arc::new(MarkdownConverter::new(
                MarkdownFlavor::CommonMark,
            )))
        });

        if let Some(module) = &config.converters.wasm_module {
            let module = module.clone();
            let fuel = config.converters.wasm_fuel;
            registry.register(WASM, Footprint::Heavy, move || {
                let module = module.clone();
                async move {
                    let converter = WasmConverter::load(WASM, &module).await?.with_fuel(fuel);
                    Ok::<SharedConverter, ConversionError>(Arc::new(converter))
                }
            });
        }

        registry
    }

    /// Register (or replace) a converter
    pub fn register<F>(&mut self, name: impl Into<String>, footprint: Footprint, factory: F) -> &mut Self
    where
        F: ConverterFactory + 'static,
    {
        let name = name.into();
        tracing::debug!(converter = %name, %footprint, "registered converter");
        self.descriptors.insert(
            name,
            Descriptor {
                footprint,
                factory: Box::new(factory),
                slot: Mutex::new(None),
                failure: std::sync::Mutex::new(None),
            },
        );
        self
    }

    /// Registered names, sorted
    pub fn names(&self) -> ConverterNames {
        ConverterNames(self.descriptors.keys().cloned().collect())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.descriptors.contains_key(name)
    }

    pub fn footprint(&self, name: &str) -> Option<Footprint> {
        self.descriptors.get(name).map(|descriptor| descriptor.footprint)
    }

    fn descriptor(&self, name: &str) -> Result<&Descriptor, ConversionError> {
        self.descriptors
            .get(name)
            .ok_or_else(|| ConversionError::UnknownConverter {
                name: name.to_string(),
                available: self.names(),
            })
    }

    /// Loaded converter for `name`, loading it first if needed
    ///
    /// # Errors
    ///
    /// - `ConversionError::UnknownConverter`: `name` is not registered; the
    ///   message lists the registered names
    /// - any error returned by the converter's factory
    ///
    /// A failed load is retried on every call and recorded until one
    /// succeeds (see [`load_failure`](Self::load_failure)).
    pub async fn get_converter(&self, name: &str) -> Result<SharedConverter, ConversionError> {
        let descriptor = self.descriptor(name)?;
        let mut slot = descriptor.slot.lock().await;
        if let Some(converter) = slot.as_ref() {
            return Ok(Arc::clone(converter));
        }

        tracing::debug!(converter = %name, "loading converter");
        match descriptor.factory.load().await {
            Ok(converter) => {
                *slot = Some(Arc::clone(&converter));
                descriptor.set_failure(None);
                tracing::debug!(converter = %name, "converter loaded");
                Ok(converter)
            }
            Err(err) => {
                tracing::warn!(converter = %name, error = %err, "failed to load converter");
                descriptor.set_failure(Some(err.slot_message()));
                Err(err)
            }
        }
    }

    /// Load every registered converter concurrently
    ///
    /// Failures are logged and returned; the failed converters stay absent.
    pub async fn load_all(&self) -> Vec<(String, ConversionError)> {
        let loads = self.descriptors.keys().map(|name| async move {
            let result = self.get_converter(name).await;
            (name.clone(), result)
        });

        join_all(loads)
            .await
            .into_iter()
            .filter_map(|(name, result)| result.err().map(|err| (name, err)))
            .collect()
    }

    /// Message of the last failed load of `name`, if its latest load failed
    pub fn load_failure(&self, name: &str) -> Option<String> {
        self.descriptors.get(name).and_then(Descriptor::failure)
    }

    /// Converters that are neither loaded nor known to fail loading
    ///
    /// Includes converters whose load is in flight right now.
    pub fn unloaded(&self) -> Vec<String> {
        self.descriptors
            .iter()
            .filter(|(name, descriptor)| descriptor.failure().is_none() && !self.is_loaded(name))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Snapshot of the converters that are currently loaded, by name
    ///
    /// Slots being loaded or disposed right now are not included.
    pub fn loaded(&self) -> Vec<(String, SharedConverter)> {
        self.descriptors
            .iter()
            .filter_map(|(name, descriptor)| {
                let slot = descriptor.slot.try_lock().ok()?;
                slot.as_ref()
                    .map(|converter| (name.clone(), Arc::clone(converter)))
            })
            .collect()
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.descriptors
            .get(name)
            .and_then(|descriptor| descriptor.slot.try_lock().ok())
            .is_some_and(|slot| slot.is_some())
    }

    /// Remove a loaded converter and release its resources
    ///
    /// Returns whether a converter was loaded. The slot is emptied even when
    /// the converter's `dispose` fails.
    ///
    /// # Errors
    ///
    /// - `ConversionError::UnknownConverter`: `name` is not registered
    /// - `ConversionError::ReclaimFailure`: `dispose` failed
    pub async fn dispose(&self, name: &str) -> Result<bool, ConversionError> {
        let descriptor = self.descriptor(name)?;
        let mut slot = descriptor.slot.lock().await;
        empty_slot(name, &mut slot)
    }

    /// Dispose every loaded converter with the given footprint
    ///
    /// Best effort: failures are logged and do not stop the sweep. Slots
    /// with a load in flight are left alone. Returns the number of
    /// converters removed.
    pub async fn reclaim(&self, footprint: Footprint) -> usize {
        let mut removed = 0;
        for (name, descriptor) in &self.descriptors {
            if descriptor.footprint != footprint {
                continue;
            }
            let Ok(mut slot) = descriptor.slot.try_lock() else {
                tracing::debug!(converter = %name, "skipping converter that is loading");
                continue;
            };
            match empty_slot(name, &mut slot) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(err) => {
                    removed += 1;
                    tracing::warn!(converter = %name, error = %err, "reclaim failed");
                }
            }
        }
        removed
    }
}

/// Take the converter out of its slot and dispose it
fn empty_slot(name: &str, slot: &mut Option<SharedConverter>) -> Result<bool, ConversionError> {
    let Some(converter) = slot.take() else {
        return Ok(false);
    };

    converter.dispose().map_err(|err| match err {
        ConversionError::ReclaimFailure { .. } => err,
        other => ConversionError::ReclaimFailure {
            name: name.to_string(),
            message: other.to_string(),
        },
    })?;
    tracing::debug!(converter = %name, "converter disposed");
    Ok(true)
}

impl fmt::Debug for ConverterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(
                self.descriptors
                    .iter()
                    .map(|(name, descriptor)| (name, descriptor.footprint)),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Converter, from_fn};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Disposable {
        disposed: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Converter for Disposable {
        async fn convert(&self, _html: &str) -> Result<String, ConversionError> {
            Ok("heavy".to_string())
        }

        fn dispose(&self) -> Result<(), ConversionError> {
            self.disposed.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ConversionError::failure("heavy", "module busy"))
            } else {
                Ok(())
            }
        }
    }

    fn counting_registry(loads: Arc<AtomicUsize>, disposed: Arc<AtomicUsize>, fail: bool) -> ConverterRegistry {
        let mut registry = ConverterRegistry::new();
        registry.register("light", Footprint::Light, || async {
            Ok::<_, ConversionError>(from_fn(|_| Ok("light".to_string())))
        });
        registry.register("heavy", Footprint::Heavy, move || {
            loads.fetch_add(1, Ordering::SeqCst);
            let disposed = Arc::clone(&disposed);
            async move {
                Ok::<SharedConverter, ConversionError>(Arc::new(Disposable { disposed, fail }))
            }
        });
        registry
    }

    #[tokio::test]
    async fn test_unknown_converter_lists_registered_names() {
        let registry = ConverterRegistry::with_builtins(&Config::default());

        let err = registry.get_converter("nonexistent").await.err().unwrap();
        assert_eq!(
            err.to_string(),
            "Unknown converter: nonexistent. Available converters: commonmark, gfm"
        );
    }

    #[tokio::test]
    async fn test_wasm_registered_only_when_configured() {
        let registry = ConverterRegistry::with_builtins(&Config::default());
        assert!(!registry.contains(WASM));

        let mut config = Config::default();
        config.converters.wasm_module = Some("pandoc.wasm".into());
        let registry = ConverterRegistry::with_builtins(&config);
        assert_eq!(registry.footprint(WASM), Some(Footprint::Heavy));
        assert_eq!(registry.footprint(GFM), Some(Footprint::Light));
        assert_eq!(registry.names().to_string(), "commonmark, gfm, wasm");
    }

    #[tokio::test]
    async fn test_lazy_load_happens_once() {
        let loads = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(Arc::clone(&loads), Arc::default(), false);

        assert!(registry.loaded().is_empty());
        registry.get_converter("heavy").await.unwrap();
        registry.get_converter("heavy").await.unwrap();

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(registry.is_loaded("heavy"));
        assert!(!registry.is_loaded("light"));
    }

    #[tokio::test]
    async fn test_load_all_reports_failures() {
        let mut registry = ConverterRegistry::with_builtins(&Config::default());
        registry.register("broken", Footprint::Heavy, || async {
            Err::<SharedConverter, _>(ConversionError::LoadFailure {
                name: "broken".to_string(),
                message: "missing module".to_string(),
            })
        });

        let failures = registry.load_all().await;

        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "broken");
        let loaded: Vec<String> = registry.loaded().into_iter().map(|(name, _)| name).collect();
        assert_eq!(loaded, vec!["commonmark", "gfm"]);
    }

    #[tokio::test]
    async fn test_reclaim_disposes_heavy_and_reload_is_transparent() {
        let loads = Arc::new(AtomicUsize::new(0));
        let disposed = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(Arc::clone(&loads), Arc::clone(&disposed), false);
        registry.load_all().await;

        assert_eq!(registry.reclaim(Footprint::Heavy).await, 1);
        assert_eq!(disposed.load(Ordering::SeqCst), 1);
        assert!(!registry.is_loaded("heavy"));
        assert!(registry.is_loaded("light"));

        // Nothing left to reclaim
        assert_eq!(registry.reclaim(Footprint::Heavy).await, 0);

        let converter = registry.get_converter("heavy").await.unwrap();
        assert_eq!(converter.convert("").await.unwrap(), "heavy");
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dispose_failure_still_removes_converter() {
        let disposed = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(Arc::default(), Arc::clone(&disposed), true);
        registry.get_converter("heavy").await.unwrap();

        let err = registry.dispose("heavy").await.unwrap_err();
        assert!(matches!(err, ConversionError::ReclaimFailure { ref name, .. } if name == "heavy"));
        assert!(!registry.is_loaded("heavy"));

        // The sweep logs and carries on
        registry.get_converter("heavy").await.unwrap();
        assert_eq!(registry.reclaim(Footprint::Heavy).await, 1);
        assert_eq!(disposed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_load_failure_is_remembered_until_success() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let mut registry = ConverterRegistry::new();
        registry.register("flaky", Footprint::Heavy, move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(ConversionError::LoadFailure {
                        name: "flaky".to_string(),
                        message: "module not found".to_string(),
                    })
                } else {
                    Ok(from_fn(|_| Ok("flaky".to_string())))
                }
            }
        });
        assert_eq!(registry.unloaded(), vec!["flaky"]);

        assert!(registry.get_converter("flaky").await.is_err());
        assert_eq!(registry.load_failure("flaky").as_deref(), Some("module not found"));
        assert!(registry.unloaded().is_empty());

        registry.get_converter("flaky").await.unwrap();
        assert_eq!(registry.load_failure("flaky"), None);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_reclaim_skips_converter_being_loaded() {
        let started = Arc::new(tokio::sync::Notify::new());
        let gate = Arc::new(tokio::sync::Notify::new());
        let (factory_started, factory_gate) = (Arc::clone(&started), Arc::clone(&gate));
        let mut registry = ConverterRegistry::new();
        registry.register("heavy", Footprint::Heavy, move || {
            let started = Arc::clone(&factory_started);
            let gate = Arc::clone(&factory_gate);
            async move {
                started.notify_one();
                gate.notified().await;
                Ok::<_, ConversionError>(from_fn(|_| Ok("heavy".to_string())))
            }
        });
        let registry = Arc::new(registry);

        let load = tokio::spawn({
            let registry = Arc::clone(&registry);
            async move { registry.get_converter("heavy").await.map(|_| ()) }
        });
        started.notified().await;

        assert_eq!(registry.reclaim(Footprint::Heavy).await, 0);
        assert_eq!(registry.unloaded(), vec!["heavy"]);

        gate.notify_one();
        load.await.unwrap().unwrap();
        assert!(registry.is_loaded("heavy"));
        assert_eq!(registry.reclaim(Footprint::Heavy).await, 1);
    }

    #[tokio::test]
    async fn test_dispose_unknown_converter() {
        let registry = ConverterRegistry::new();
        assert!(matches!(
            registry.dispose("ghost").await,
            Err(ConversionError::UnknownConverter { .. })
        ));
    }
}
