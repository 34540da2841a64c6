//! Structured logging setup for topoextract
//!
//! Initialization of the `tracing` subscriber. Logs always go to stderr so
//! that stdout only carries exported documents.
//!
//! # Features
//!
//! - Console output (default) or JSON lines
//! - `RUST_LOG` replaces the default `topoextract=<level>` directive
//! - Initialization happens at most once per process
//!
//! # Example
//!
//! ```no_run
//! use topoextract::util::logging;
//! use tracing::info;
//!
//! logging::init_logging(logging::LoggingConfig::from_env());
//! info!(path = "bgp/test_bgp.py", "Extracting");
//! ```

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Ensures logging is only initialized once
static INIT: Once = Once::new();

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum log level to display
    pub level: Level,

    /// Use JSON output format
    pub use_json: bool,

    /// Include the module target (e.g., topoextract::batch) in logs
    pub include_target: bool,

    /// Include file and line number information
    pub include_location: bool,

    /// Include thread ID and name in logs
    pub include_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
            include_location: false,
            include_thread_ids: false,
        }
    }
}

impl LoggingConfig {
    /// JSON output with full metadata
    pub fn production() -> Self {
        Self {
            level: Level::INFO,
            use_json: true,
            include_target: true,
            include_location: true,
            include_thread_ids: true,
        }
    }

    /// Level from `TOPOEXTRACT_LOG_LEVEL`; `TOPOEXTRACT_LOG_JSON=true` selects
    /// the [`LoggingConfig::production`] layout
    pub fn from_env() -> Self {
        let use_json = env::var("TOPOEXTRACT_LOG_JSON")
            .ok()
            .and_then(|v| v.parse::<bool>().ok())
            .unwrap_or(false);
        let base = if use_json {
            Self::production()
        } else {
            Self::default()
        };
        let level = env::var("TOPOEXTRACT_LOG_LEVEL")
            .map(|v| parse_level(&v))
            .unwrap_or(Level::INFO);
        Self { level, ..base }
    }

    /// Console output at DEBUG. Thread names are shown because the dynamic
    /// extractor runs builder code on its own interpreter thread.
    pub fn development() -> Self {
        Self {
            level: Level::DEBUG,
            use_json: false,
            include_target: true,
            include_location: false,
            include_thread_ids: true,
        }
    }
}

/// Parses a log level from a string, case-insensitive
///
/// ```
/// use topoextract::util::logging::parse_level;
/// use tracing::Level;
///
/// assert_eq!(parse_level("debug"), Level::DEBUG);
/// assert_eq!(parse_level("WARN"), Level::WARN);
/// assert_eq!(parse_level("chatty"), Level::INFO);
/// ```
pub fn parse_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to INFO. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::INFO
        }
    }
}

/// Level chosen from command-line flags: an explicit `--log-level` wins,
/// then `-v`, then `-q`, then `TOPOEXTRACT_LOG_LEVEL`
pub fn level_from_flags(log_level: Option<&str>, verbose: bool, quiet: bool) -> Level {
    if let Some(level) = log_level {
        parse_level(level)
    } else if verbose {
        Level::DEBUG
    } else if quiet {
        Level::ERROR
    } else {
        env::var("TOPOEXTRACT_LOG_LEVEL")
            .map(|v| parse_level(&v))
            .unwrap_or(Level::INFO)
    }
}

fn build_filter(level: Level) -> EnvFilter {
    if env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    let mut filter = EnvFilter::new("warn");
    if let Ok(directive) = format!("topoextract={}", level).parse() {
        filter = filter.add_directive(directive);
    }
    filter
}

/// Installs the global subscriber; later calls are ignored
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config.level);

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location)
                        .with_thread_ids(config.include_thread_ids)
                        .with_thread_names(config.include_thread_ids),
                )
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(config.include_target)
                        .with_file(config.include_location)
                        .with_line_number(config.include_location)
                        .with_thread_ids(config.include_thread_ids)
                        .with_thread_names(config.include_thread_ids),
                )
                .init();
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("info"), Level::INFO);
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("error"), Level::ERROR);
    }

    #[test]
    fn test_parse_level_case_insensitive() {
        assert_eq!(parse_level("TRACE"), Level::TRACE);
        assert_eq!(parse_level("Debug"), Level::DEBUG);
    }

    #[test]
    fn test_parse_level_invalid() {
        assert_eq!(parse_level("invalid"), Level::INFO);
        assert_eq!(parse_level(""), Level::INFO);
    }

    #[test]
    fn test_flags_take_precedence() {
        assert_eq!(level_from_flags(Some("trace"), true, false), Level::TRACE);
        assert_eq!(level_from_flags(None, true, false), Level::DEBUG);
        assert_eq!(level_from_flags(None, false, true), Level::ERROR);
    }

    #[test]
    #[serial]
    fn test_flags_fall_back_to_env() {
        env::set_var("TOPOEXTRACT_LOG_LEVEL", "warn");
        let level = level_from_flags(None, false, false);
        env::remove_var("TOPOEXTRACT_LOG_LEVEL");
        assert_eq!(level, Level::WARN);
        assert_eq!(level_from_flags(None, false, false), Level::INFO);
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        env::set_var("TOPOEXTRACT_LOG_LEVEL", "debug");
        env::set_var("TOPOEXTRACT_LOG_JSON", "true");
        let config = LoggingConfig::from_env();
        env::remove_var("TOPOEXTRACT_LOG_LEVEL");
        env::remove_var("TOPOEXTRACT_LOG_JSON");

        assert_eq!(config.level, Level::DEBUG);
        assert!(config.use_json);
        assert!(config.include_location);

        let plain = LoggingConfig::from_env();
        assert_eq!(plain.level, Level::INFO);
        assert!(!plain.use_json);
    }

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(!config.use_json);
        assert!(config.include_target);
        assert!(!config.include_location);
    }

    #[test]
    fn test_production_config() {
        let config = LoggingConfig::production();
        assert!(config.use_json);
        assert!(config.include_location);
        assert!(config.include_thread_ids);
    }

    #[test]
    fn test_development_config() {
        let config = LoggingConfig::development();
        assert_eq!(config.level, Level::DEBUG);
        assert!(!config.use_json);
        assert!(config.include_thread_ids);
    }

    #[test]
    #[serial]
    fn test_default_filter_names_crate() {
        env::remove_var("RUST_LOG");
        let filter = build_filter(Level::DEBUG).to_string();
        assert!(filter.contains("topoextract=debug"));
    }
}
