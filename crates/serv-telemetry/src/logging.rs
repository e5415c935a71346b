//! Structured logging setup.
//!
//! Installs a global `tracing-subscriber` registry with an [`EnvFilter`] and a
//! single fmt layer, either JSON (production) or human readable (development).
//!
//! # Example
//!
//! ```no_run
//! use serv_telemetry::{init_logging, LogConfig};
//!
//! # fn main() -> Result<(), serv_telemetry::TelemetryError> {
//! init_logging(&LogConfig::development())?;
//! tracing::info!(port = 8080, "listening");
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Environment variable that overrides [`LogConfig::level`].
pub const FILTER_ENV: &str = "RUST_LOG";

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    /// Whether a subscriber is installed at all.
    pub enabled: bool,

    /// Level or filter directives, e.g. `info` or `serv=debug,hyper=warn`.
    pub level: String,

    /// Emit one JSON object per event instead of human readable text.
    pub json_format: bool,

    /// Include the event target (module path).
    pub include_target: bool,

    /// Include source file and line.
    pub include_location: bool,

    /// Emit events when spans open and close.
    pub span_events: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::production()
    }
}

impl LogConfig {
    /// Human readable output at `debug` level, with source locations and
    /// span events.
    #[must_use]
    pub fn development() -> Self {
        Self {
            enabled: true,
            level: "debug".to_string(),
            json_format: false,
            include_target: true,
            include_location: true,
            span_events: true,
        }
    }

    /// JSON output at `info` level.
    #[must_use]
    pub fn production() -> Self {
        Self {
            enabled: true,
            level: "info".to_string(),
            json_format: true,
            include_target: true,
            include_location: false,
            span_events: false,
        }
    }
}

/// Builds the filter for `config`, letting a non-empty `RUST_LOG` take
/// precedence over [`LogConfig::level`].
pub fn env_filter(config: &LogConfig) -> TelemetryResult<EnvFilter> {
    let from_env = std::env::var(FILTER_ENV).ok();
    create_env_filter(select_filter(&config.level, from_env.as_deref()))
}

fn select_filter<'a>(level: &'a str, from_env: Option<&'a str>) -> &'a str {
    match from_env {
        Some(directives) if !directives.trim().is_empty() => directives,
        _ => level,
    }
}

/// Parses filter directives.
pub fn create_env_filter(directives: &str) -> TelemetryResult<EnvFilter> {
    EnvFilter::try_new(directives).map_err(|err| TelemetryError::InvalidFilter {
        filter: directives.to_string(),
        reason: err.to_string(),
    })
}

/// Installs the global subscriber described by `config`.
///
/// Does nothing when logging is disabled. Fails with
/// [`TelemetryError::AlreadyInitialized`] when a global subscriber exists.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let filter = env_filter(config)?;
    let span_events = if config.span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let registry = tracing_subscriber::registry();
    let result = if config.json_format {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(config.include_target)
            .with_filter(filter);
        registry.with(layer).try_init()
    } else {
        let layer = tracing_subscriber::fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_file(config.include_location)
            .with_line_number(config.include_location)
            .with_target(config.include_target)
            .with_filter(filter);
        registry.with(layer).try_init()
    };

    result.map_err(|_| TelemetryError::AlreadyInitialized)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets() {
        let dev = LogConfig::development();
        assert!(!dev.json_format);
        assert!(dev.span_events);
        assert!(dev.include_location);
        assert_eq!(dev.level, "debug");

        let prod = LogConfig::production();
        assert!(prod.json_format);
        assert!(!prod.span_events);
        assert_eq!(prod.level, "info");
        assert_eq!(LogConfig::default(), prod);
    }

    #[test]
    fn test_env_overrides_level() {
        assert_eq!(select_filter("info", None), "info");
        assert_eq!(select_filter("info", Some("  ")), "info");
        assert_eq!(select_filter("info", Some("serv=trace")), "serv=trace");
    }

    #[test]
    fn test_create_env_filter() {
        assert!(create_env_filter("serv=debug,hyper=warn").is_ok());
        let err = create_env_filter("serv=notalevel").unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidFilter { .. }));
    }

    #[test]
    fn test_disabled_logging_is_noop() {
        let config = LogConfig {
            enabled: false,
            ..LogConfig::default()
        };
        assert!(init_logging(&config).is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: LogConfig = serde_json::from_str(r#"{"level": "warn"}"#).unwrap();
        assert_eq!(config.level, "warn");
        assert!(config.json_format);

        let unknown = serde_json::from_str::<LogConfig>(r#"{"colour": true}"#);
        assert!(unknown.is_err());
    }
}
