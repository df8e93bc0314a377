//! Converter capability shared by every backend
//!
//! A backend exposes exactly two operations: `convert` (HTML → Markdown,
//! possibly asynchronous) and `dispose` (release whatever the backend keeps
//! resident). The registry and orchestrator only ever see
//! `Arc<dyn Converter>`, so any backend with this shape can be plugged in.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::error::ConversionError;

/// HTML → Markdown backend
#[async_trait]
pub trait Converter: Send + Sync {
    /// Convert sanitized HTML to Markdown
    async fn convert(&self, html: &str) -> Result<String, ConversionError>;

    /// Release resident resources
    ///
    /// Stateless backends have nothing to release.
    fn dispose(&self) -> Result<(), ConversionError> {
        Ok(())
    }
}

/// Loaded converter as held by the registry
pub type SharedConverter = Arc<dyn Converter>;

/// How expensive a backend is to keep loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Footprint {
    /// Cheap, pure-function converter
    Light,
    /// Holds a module instance or similar; reclaimed when idle
    Heavy,
}

impl fmt::Display for Footprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Footprint::Light => f.write_str("light"),
            Footprint::Heavy => f.write_str("heavy"),
        }
    }
}

/// Future returned by a converter factory
pub type LoadFuture = BoxFuture<'static, Result<SharedConverter, ConversionError>>;

/// Asynchronous converter factory
///
/// Called on first demand and again after every reclaim.
pub trait ConverterFactory: Send + Sync {
    fn load(&self) -> LoadFuture;
}

impl<F, Fut> ConverterFactory for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<SharedConverter, ConversionError>> + Send + 'static,
{
    fn load(&self) -> LoadFuture {
        Box::pin(self())
    }
}

/// Converter backed by a plain function
///
/// Handy for lightweight backends and for wiring test doubles.
pub struct FnConverter<F> {
    convert: F,
}

impl<F> FnConverter<F>
where
    F: Fn(&str) -> Result<String, ConversionError> + Send + Sync,
{
    pub fn new(convert: F) -> Self {
        Self { convert }
    }
}

#[async_trait]
impl<F> Converter for FnConverter<F>
where
    F: Fn(&str) -> Result<String, ConversionError> + Send + Sync,
{
    async fn convert(&self, html: &str) -> Result<String, ConversionError> {
        (self.convert)(html)
    }
}

/// Wrap a function as a shared converter
pub fn from_fn<F>(convert: F) -> SharedConverter
where
    F: Fn(&str) -> Result<String, ConversionError> + Send + Sync + 'static,
{
    Arc::new(FnConverter::new(convert))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fn_converter_and_default_dispose() {
        let converter = from_fn(|html| Ok(html.to_uppercase()));

        assert_eq!(converter.convert("<p>x</p>").await.unwrap(), "<P>X</P>");
        assert!(converter.dispose().is_ok());
    }

    #[tokio::test]
    async fn test_closure_factory() {
        let factory = || async { Ok::<_, ConversionError>(from_fn(|_| Ok("loaded".to_string()))) };

        let converter = factory.load().await.unwrap();
        assert_eq!(converter.convert("").await.unwrap(), "loaded");
    }

    #[test]
    fn test_footprint_display() {
        assert_eq!(Footprint::Light.to_string(), "light");
        assert_eq!(Footprint::Heavy.to_string(), "heavy");
    }
}
