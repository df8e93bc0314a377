//! Configuration for the converter pipeline.
//!
//! Parsed from TOML with serde. Every section and field is optional; absent
//! values take the defaults shown below.
//!
//! ```toml
//! [converters]
//! default = "gfm"
//! wasm_module = "pandoc.wasm"   # registers the "wasm" backend
//! wasm_fuel = 10000000000       # per-call guest instruction budget
//!
//! [idle]
//! threshold_ms = 600000
//!
//! [equivalence]
//! enabled = true
//! context_chars = 40
//!
//! [sanitizer]
//! clean = true
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::wasm::DEFAULT_FUEL;

/// Pipeline configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Converter selection and backends.
    pub converters: ConvertersConfig,
    /// Idle reclamation.
    pub idle: IdleConfig,
    /// Equivalence diagnostic.
    pub equivalence: EquivalenceConfig,
    /// Sanitizer mode.
    pub sanitizer: SanitizerConfig,
}

/// Converter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConvertersConfig {
    /// Converter used by the library entry point and the CLI.
    pub default: String,
    /// WebAssembly converter module; the `wasm` backend exists only when set.
    pub wasm_module: Option<PathBuf>,
    /// Fuel granted to each call into the WebAssembly module.
    pub wasm_fuel: u64,
}

impl Default for ConvertersConfig {
    fn default() -> Self {
        Self {
            default: "gfm".to_owned(),
            wasm_module: None,
            wasm_fuel: DEFAULT_FUEL,
        }
    }
}

/// Idle reclamation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct IdleConfig {
    /// Continuous inactivity before heavy converters are disposed.
    pub threshold_ms: u64,
}

impl IdleConfig {
    #[must_use]
    pub fn threshold(&self) -> Duration {
        Duration::from_millis(self.threshold_ms)
    }
}

impl Default for IdleConfig {
    fn default() -> Self {
        Self {
            threshold_ms: 600_000,
        }
    }
}

/// Equivalence diagnostic configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EquivalenceConfig {
    /// Whether rendered outputs are compared after each conversion.
    pub enabled: bool,
    /// Characters of context logged on each side of a divergence.
    pub context_chars: usize,
}

impl Default for EquivalenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            context_chars: 40,
        }
    }
}

/// Sanitizer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SanitizerConfig {
    /// Full allow-list sanitization; `false` only strips `style` attributes.
    pub clean: bool,
}

impl Default for SanitizerConfig {
    fn default() -> Self {
        Self { clean: true }
    }
}

impl Config {
    /// Parse and validate configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is malformed or a value is invalid.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file.
    ///
    /// A relative `wasm_module` path is resolved against the directory of
    /// the config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&content)?;

        if let Some(module) = &config.converters.wasm_module
            && module.is_relative()
            && let Some(base) = path.parent()
        {
            config.converters.wasm_module = Some(base.join(module));
        }

        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Check value constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle.threshold_ms == 0 {
            return Err(ConfigError::Invalid(
                "idle.threshold_ms must be greater than zero".to_owned(),
            ));
        }
        if self.converters.wasm_fuel == 0 {
            return Err(ConfigError::Invalid(
                "converters.wasm_fuel must be greater than zero".to_owned(),
            ));
        }
        if self.converters.default.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "converters.default must not be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.converters.default, "gfm");
        assert_eq!(config.converters.wasm_module, None);
        assert_eq!(config.converters.wasm_fuel, DEFAULT_FUEL);
        assert_eq!(config.idle.threshold(), Duration::from_secs(600));
        assert!(config.equivalence.enabled);
        assert_eq!(config.equivalence.context_chars, 40);
        assert!(config.sanitizer.clean);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        assert_eq!(Config::from_toml_str("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_sections() {
        let config = Config::from_toml_str(
            r#"
            [converters]
            wasm_module = "/opt/pandoc.wasm"
            wasm_fuel = 5000

            [idle]
            threshold_ms = 1500

            [sanitizer]
            clean = false
            "#,
        )
        .unwrap();

        assert_eq!(config.converters.default, "gfm");
        assert_eq!(
            config.converters.wasm_module,
            Some(PathBuf::from("/opt/pandoc.wasm"))
        );
        assert_eq!(config.converters.wasm_fuel, 5000);
        assert_eq!(config.idle.threshold(), Duration::from_millis(1500));
        assert!(config.equivalence.enabled);
        assert!(!config.sanitizer.clean);
    }

    #[test]
    fn test_zero_threshold_is_invalid() {
        let err = Config::from_toml_str("[idle]\nthreshold_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("threshold_ms")));
    }

    #[test]
    fn test_zero_fuel_is_invalid() {
        let err = Config::from_toml_str("[converters]\nwasm_fuel = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("wasm_fuel")));
    }

    #[test]
    fn test_empty_default_converter_is_invalid() {
        let err = Config::from_toml_str("[converters]\ndefault = \" \"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_malformed_toml() {
        let err = Config::from_toml_str("[idle\nthreshold_ms = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_resolves_module_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("markpaste.toml");
        std::fs::write(&path, "[converters]\nwasm_module = \"pandoc.wasm\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(
            config.converters.wasm_module,
            Some(dir.path().join("pandoc.wasm"))
        );
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Path::new("/nonexistent/markpaste.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
