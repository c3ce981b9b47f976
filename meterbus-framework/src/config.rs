//! Configuration traits and utilities.

use std::path::Path;

use serde::de::DeserializeOwned;

use meterbus_common::{LoggingConfig, init_tracing};

use crate::error::{FrameworkError, Result};

/// Trait for component configuration types.
///
/// Implement this trait for a binary's configuration struct to get
/// loading, validation and logging initialization.
///
/// # Example
///
/// ```ignore
/// use serde::Deserialize;
/// use meterbus_framework::{BusConfig, ComponentConfig, FrameworkError, LoggingConfig};
///
/// #[derive(Debug, Default, Deserialize)]
/// pub struct MyConfig {
///     #[serde(default)]
///     pub bus: BusConfig,
///     #[serde(default)]
///     pub logging: LoggingConfig,
/// }
///
/// impl ComponentConfig for MyConfig {
///     fn logging(&self) -> &LoggingConfig {
///         &self.logging
///     }
///
///     fn validate(&self) -> meterbus_framework::Result<()> {
///         self.bus.validate().map_err(FrameworkError::from)
///     }
/// }
/// ```
pub trait ComponentConfig: Sized + DeserializeOwned {
    /// Get the logging configuration.
    fn logging(&self) -> &LoggingConfig;

    /// Validate the configuration.
    ///
    /// Called automatically after loading. Override to add custom validation.
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Load configuration from a file path.
    ///
    /// Supports JSON5 format. Calls [`validate`](Self::validate) after loading.
    fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(FrameworkError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string and validate it.
    fn parse(content: &str) -> Result<Self> {
        let config: Self = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults when an implicit default
    /// path does not exist.
    ///
    /// `explicit` is `true` when the path came from the command line; a
    /// missing explicit file is an error.
    fn load_or_default(path: impl AsRef<Path>, explicit: bool) -> Result<Self>
    where
        Self: Default,
    {
        let path = path.as_ref();
        if !explicit && !path.exists() {
            let config = Self::default();
            config.validate()?;
            return Ok(config);
        }
        Self::load(path)
    }

    /// Initialize tracing from the logging section, with an optional CLI
    /// level override.
    fn init_logging(&self, level_override: Option<&str>) -> Result<()> {
        let mut logging = self.logging().clone();
        if let Some(level) = level_override {
            logging.level = level.to_string();
        }
        init_tracing(&logging).map_err(|e| FrameworkError::config(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::io::Write;

    #[derive(Debug, Default, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        logging: LoggingConfig,
        #[serde(default)]
        interval_ms: u64,
    }

    impl ComponentConfig for TestConfig {
        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }

        fn validate(&self) -> Result<()> {
            if self.interval_ms > 60_000 {
                return Err(FrameworkError::validation("interval_ms too large"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_config_not_found() {
        let result = TestConfig::load("/nonexistent/path.json5");
        assert!(matches!(result, Err(FrameworkError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let result = TestConfig::load_or_default("/nonexistent/path.json5", true);
        assert!(matches!(result, Err(FrameworkError::ConfigNotFound { .. })));
    }

    #[test]
    fn test_implicit_missing_file_uses_defaults() {
        let config = TestConfig::load_or_default("/nonexistent/path.json5", false).unwrap();
        assert_eq!(config.interval_ms, 0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{ interval_ms: 120000 }}").unwrap();

        let result = TestConfig::load(file.path());
        assert!(matches!(result, Err(FrameworkError::ConfigValidation(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{ interval_ms: 500, logging: {{ level: 'debug' }} }}").unwrap();

        let config = TestConfig::load(file.path()).unwrap();
        assert_eq!(config.interval_ms, 500);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_parse_error() {
        let result = TestConfig::parse("{ interval_ms: ");
        assert!(matches!(result, Err(FrameworkError::ConfigParse(_))));
    }
}
