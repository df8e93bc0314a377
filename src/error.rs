//! Error types for sanitization, conversion and converter lifecycle

use std::fmt;

/// Errors raised while converting clipboard content to Markdown
#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    /// Requested converter name is not registered
    #[error("Unknown converter: {name}. Available converters: {available}")]
    UnknownConverter {
        name: String,
        available: ConverterNames,
    },
    /// A backend raised during `convert`
    #[error("Converter {name} failed: {message}")]
    ConverterFailure { name: String, message: String },
    /// A backend factory could not produce a converter
    #[error("Failed to load converter {name}: {message}")]
    LoadFailure { name: String, message: String },
    /// Disposing a backend's resources failed
    #[error("Failed to reclaim converter {name}: {message}")]
    ReclaimFailure { name: String, message: String },
    /// Invalid input data
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl ConversionError {
    /// Shorthand for a backend failure
    pub fn failure(name: impl Into<String>, message: impl fmt::Display) -> Self {
        ConversionError::ConverterFailure {
            name: name.into(),
            message: message.to_string(),
        }
    }

    /// Message suitable for a per-converter output slot
    ///
    /// Backend failures carry their own converter name, so only the inner
    /// message is returned for them.
    pub fn slot_message(&self) -> String {
        match self {
            ConversionError::ConverterFailure { message, .. }
            | ConversionError::LoadFailure { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Sorted list of registered converter names, rendered comma separated
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConverterNames(pub Vec<String>);

impl fmt::Display for ConverterNames {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(", "))
    }
}

/// Errors raised while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
