//! Configuration management for topoextract
//!
//! Settings are loaded from environment variables with sensible defaults.
//! Command-line flags take precedence over everything loaded here.
//!
//! # Environment Variables
//!
//! - `TOPOEXTRACT_STRATEGIES`: Comma separated strategy order - default: "dynamic,syntax,text"
//! - `TOPOEXTRACT_SHAPE`: Export shape (rich|simple) - default: "rich"
//! - `TOPOEXTRACT_RUNDIR`: Scratch rundir handed to builder code - default: system temp dir + "topotests_export_logs"
//! - `TOPOEXTRACT_LOG_LEVEL`: Logging level - default: "info"
//!
//! # Example
//!
//! ```no_run
//! use topoextract::TopoExtractConfig;
//!
//! let config = TopoExtractConfig::default();
//! config.validate().expect("Invalid configuration");
//! let strategies = config.strategy_list().expect("valid strategies");
//! ```

use crate::export::Shape;
use crate::extractors::Strategy;
use crate::runtime::RuntimeSettings;
use std::env;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_STRATEGIES: &str = "dynamic,syntax,text";
const DEFAULT_SHAPE: &str = "rich";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Configuration errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid strategy list '{value}': {reason}")]
    InvalidStrategies { value: String, reason: String },

    #[error("Invalid shape: {0}. Valid options: rich, simple")]
    InvalidShape(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopoExtractConfig {
    /// Raw strategy order, e.g. `dynamic,text`
    pub strategies: String,

    /// Raw export shape
    pub shape: String,

    /// Scratch directory reported to builder code as `rundir`
    pub rundir: PathBuf,

    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for TopoExtractConfig {
    /// Loads from `TOPOEXTRACT_*` environment variables, falling back to defaults
    fn default() -> Self {
        let strategies =
            env::var("TOPOEXTRACT_STRATEGIES").unwrap_or_else(|_| DEFAULT_STRATEGIES.to_string());

        let shape = env::var("TOPOEXTRACT_SHAPE")
            .unwrap_or_else(|_| DEFAULT_SHAPE.to_string())
            .to_lowercase();

        let rundir = env::var("TOPOEXTRACT_RUNDIR")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| RuntimeSettings::default().rundir);

        let log_level = env::var("TOPOEXTRACT_LOG_LEVEL")
            .unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string())
            .to_lowercase();

        Self {
            strategies,
            shape,
            rundir,
            log_level,
        }
    }
}

impl TopoExtractConfig {
    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for an empty or duplicated strategy entry, an
    /// unknown shape, an empty rundir or an unknown log level.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.strategy_list()?;
        self.export_shape()?;

        if self.rundir.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Run directory must not be empty".to_string(),
            ));
        }

        match self.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(ConfigError::ValidationFailed(format!(
                    "Invalid log level: {}. Valid options: trace, debug, info, warn, error",
                    self.log_level
                )))
            }
        }

        Ok(())
    }

    pub fn strategy_list(&self) -> Result<Vec<Strategy>, ConfigError> {
        Strategy::parse_list(&self.strategies).map_err(|reason| ConfigError::InvalidStrategies {
            value: self.strategies.clone(),
            reason,
        })
    }

    pub fn export_shape(&self) -> Result<Shape, ConfigError> {
        self.shape
            .parse()
            .map_err(|_| ConfigError::InvalidShape(self.shape.clone()))
    }

    pub fn runtime_settings(&self) -> RuntimeSettings {
        RuntimeSettings::with_rundir(self.rundir.clone())
    }
}

impl fmt::Display for TopoExtractConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "TopoExtract Configuration:")?;
        writeln!(f, "  Strategies: {}", self.strategies)?;
        writeln!(f, "  Shape: {}", self.shape)?;
        writeln!(f, "  Run Dir: {}", self.rundir.display())?;
        writeln!(f, "  Log Level: {}", self.log_level)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    /// Helper to temporarily set environment variables for testing
    struct EnvGuard {
        key: String,
        old_value: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let old_value = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                old_value,
            }
        }

        fn unset(key: &str) -> Self {
            let old_value = env::var(key).ok();
            env::remove_var(key);
            Self {
                key: key.to_string(),
                old_value,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.old_value {
                Some(v) => env::set_var(&self.key, v),
                None => env::remove_var(&self.key),
            }
        }
    }

    fn valid() -> TopoExtractConfig {
        TopoExtractConfig {
            strategies: "dynamic,syntax,text".to_string(),
            shape: "rich".to_string(),
            rundir: PathBuf::from("/tmp/topotests"),
            log_level: "info".to_string(),
        }
    }

    #[test]
    #[serial]
    fn test_default_configuration() {
        let _guards = vec![
            EnvGuard::unset("TOPOEXTRACT_STRATEGIES"),
            EnvGuard::unset("TOPOEXTRACT_SHAPE"),
            EnvGuard::unset("TOPOEXTRACT_RUNDIR"),
            EnvGuard::unset("TOPOEXTRACT_LOG_LEVEL"),
        ];

        let config = TopoExtractConfig::default();

        assert_eq!(config.strategy_list().unwrap(), Strategy::DEFAULT_ORDER.to_vec());
        assert_eq!(config.export_shape().unwrap(), Shape::Rich);
        assert!(config.rundir.ends_with("topotests_export_logs"));
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_environment_variable_parsing() {
        let _guards = vec![
            EnvGuard::set("TOPOEXTRACT_STRATEGIES", "text, dynamic"),
            EnvGuard::set("TOPOEXTRACT_SHAPE", "SIMPLE"),
            EnvGuard::set("TOPOEXTRACT_RUNDIR", "/var/tmp/runs"),
            EnvGuard::set("TOPOEXTRACT_LOG_LEVEL", "DEBUG"),
        ];

        let config = TopoExtractConfig::default();

        assert_eq!(
            config.strategy_list().unwrap(),
            vec![Strategy::Text, Strategy::Dynamic]
        );
        assert_eq!(config.export_shape().unwrap(), Shape::Simple);
        assert_eq!(config.runtime_settings().rundir, PathBuf::from("/var/tmp/runs"));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_validation_valid() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_duplicate_strategy() {
        let mut config = valid();
        config.strategies = "text,dynamic,text".to_string();

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidStrategies { .. })
        ));
    }

    #[test]
    fn test_validation_rejects_empty_strategy() {
        let mut config = valid();
        config.strategies = "dynamic,,text".to_string();
        assert!(config.validate().is_err());

        config.strategies = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_unknown_shape() {
        let mut config = valid();
        config.shape = "graphml".to_string();

        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidShape("graphml".to_string()))
        );
    }

    #[test]
    fn test_validation_invalid_log_level() {
        let mut config = valid();
        config.log_level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_display() {
        let display = format!("{}", valid());
        assert!(display.contains("TopoExtract Configuration:"));
        assert!(display.contains("Strategies: dynamic,syntax,text"));
    }
}
