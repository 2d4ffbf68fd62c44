//! Structured logging setup for kiln
//!
//! Initialization and configuration for structured logging on the
//! `tracing` ecosystem: console output with pretty formatting by default,
//! optional JSON output, and environment-based filtering via `RUST_LOG`
//! or `KILN_LOG_LEVEL`. Initialization happens at most once.
//!
//! # Example
//!
//! ```no_run
//! use kiln::util::logging;
//!
//! logging::init_default();
//!
//! use tracing::{debug, info};
//! info!("starting");
//! debug!(reference = "+build", "lowering");
//! ```

use std::env;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Ensures logging is only initialized once
static INIT: Once = Once::new();

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Use JSON output format (for structured logging in production)
    pub use_json: bool,
    /// Include the module target (e.g., kiln::lower) in logs
    pub include_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            use_json: false,
            include_target: true,
        }
    }
}

impl LoggingConfig {
    pub fn with_level(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }
}

/// Parses a log level from a string, defaulting to INFO on anything
/// unrecognized.
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

/// Initializes the logging system with the provided configuration. Can
/// only be called once; subsequent calls are ignored.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let mut filter = EnvFilter::from_default_env();
        if env::var("RUST_LOG").is_err() {
            filter = filter
                .add_directive(format!("kiln={}", config.level).parse().unwrap())
                .add_directive("tokio=warn".parse().unwrap());
        }

        if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_target(config.include_target))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_target(config.include_target))
                .init();
        }
    });
}

/// Initializes logging with defaults.
pub fn init_default() {
    init_logging(LoggingConfig::default());
}

/// Initializes logging from `KILN_LOG_LEVEL` and `KILN_LOG_JSON`.
pub fn init_from_env() {
    let level = env::var("KILN_LOG_LEVEL")
        .map(|s| parse_level(&s))
        .unwrap_or(Level::INFO);
    let use_json = env::var("KILN_LOG_JSON")
        .map(|s| s == "true" || s == "1")
        .unwrap_or(false);
    init_logging(LoggingConfig {
        level,
        use_json,
        ..Default::default()
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_accepts_known_levels() {
        assert_eq!(parse_level("debug"), Level::DEBUG);
        assert_eq!(parse_level("INFO"), Level::INFO);
        assert_eq!(parse_level("Warn"), Level::WARN);
    }

    #[test]
    fn parse_level_defaults_to_info() {
        assert_eq!(parse_level("invalid"), Level::INFO);
    }
}
