//! Layered configuration loading.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{ConfigError, ServConfig};

/// Default prefix of environment overrides.
pub const DEFAULT_ENV_PREFIX: &str = "SERV";

/// Loads a [`ServConfig`] in layers, later layers overriding earlier ones:
///
/// 1. default values
/// 2. a configuration file (TOML or JSON, chosen by extension)
/// 3. environment variables named `PREFIX__SECTION__KEY`
///
/// A file replaces the defaults section by section; keys it leaves out keep
/// their default values.
///
/// # Example
///
/// ```no_run
/// use serv_config::ConfigLoader;
///
/// # fn main() -> Result<(), serv_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_optional_file("serv.toml")?
///     .with_env_prefix("SERV")
///     .load()?;
/// # let _ = config;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config: ServConfig,
    env_prefix: Option<String>,
    source: Option<PathBuf>,
}

impl ConfigLoader {
    /// Creates a loader starting from the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from [`ServConfig::development`].
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = ServConfig::development();
        self
    }

    /// Starts from [`ServConfig::production`].
    #[must_use]
    pub fn with_production(mut self) -> Self {
        self.config = ServConfig::production();
        self
    }

    /// Loads `path`, which must exist.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::file_not_found(path));
        }

        let content = fs::read_to_string(path).map_err(|err| ConfigError::read_error(path, err))?;
        let format = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default();
        self.config = parse(&content, format)?;
        self.source = Some(path.to_path_buf());
        tracing::debug!(path = %path.display(), "loaded configuration file");
        Ok(self)
    }

    /// Loads `path` when it exists.
    pub fn with_optional_file(self, path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Loads configuration from `content` in `format` (`toml` or `json`).
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = parse(content, format)?;
        Ok(self)
    }

    /// Enables environment overrides named `PREFIX__SECTION__KEY`, e.g.
    /// `SERV__SERVER__PORT=9000` or `SERV__TLS__CERT_FILE=/etc/serv/cert.pem`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// The file loaded last, if any.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Applies environment overrides and validates the result.
    pub fn load(mut self) -> Result<ServConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_vars(&prefix, env::vars())?;
        }
        self.config.validate()?;
        Ok(self.config)
    }

    /// Returns the configuration without environment overrides or
    /// validation.
    #[must_use]
    pub fn load_unvalidated(self) -> ServConfig {
        self.config
    }

    fn apply_vars<I>(&mut self, prefix: &str, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let marker = format!("{prefix}__");
        for (key, value) in vars {
            if key.starts_with(&marker) {
                self.apply_env_var(&key, &value, prefix)?;
            }
        }
        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let path = key
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_parse_error(key, "invalid key format"))?;
        let parts: Vec<&str> = path.split("__").collect();

        let server = &mut self.config.server;
        let tls = &mut self.config.tls;
        let logging = &mut self.config.logging;
        let metrics = &mut self.config.metrics;
        match parts.as_slice() {
            ["SERVER", "NAME"] => server.name = value.to_string(),
            ["SERVER", "ADDR"] => server.addr = value.to_string(),
            ["SERVER", "PORT"] => server.port = value.to_string(),
            ["SERVER", "READ_TIMEOUT_MS"] => server.read_timeout_ms = parse_int(key, value)?,
            ["SERVER", "READ_HEADER_TIMEOUT_MS"] => {
                server.read_header_timeout_ms = parse_int(key, value)?;
            }
            ["SERVER", "WRITE_TIMEOUT_MS"] => server.write_timeout_ms = parse_int(key, value)?,
            ["SERVER", "IDLE_TIMEOUT_SECS"] => server.idle_timeout_secs = parse_int(key, value)?,
            ["SERVER", "SHUTDOWN_TIMEOUT_SECS"] => {
                server.shutdown_timeout_secs = parse_int(key, value)?;
            }
            ["SERVER", "MAX_HEADER_BYTES"] => {
                server.max_header_bytes = value
                    .parse()
                    .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))?;
            }

            ["TLS", "CA_CERT_FILE"] => tls.ca_cert_file = optional_path(value),
            ["TLS", "CERT_FILE"] => tls.cert_file = optional_path(value),
            ["TLS", "KEY_FILE"] => tls.key_file = optional_path(value),
            ["TLS", "VERIFY_CLIENT"] => tls.verify_client = parse_bool_var(key, value)?,
            ["TLS", "INSECURE_SKIP_VERIFY"] => {
                tls.insecure_skip_verify = parse_bool_var(key, value)?;
            }

            ["LOGGING", "ENABLED"] => logging.enabled = parse_bool_var(key, value)?,
            ["LOGGING", "LEVEL"] => logging.level = value.to_string(),
            ["LOGGING", "JSON_FORMAT"] => logging.json_format = parse_bool_var(key, value)?,
            ["LOGGING", "INCLUDE_TARGET"] => logging.include_target = parse_bool_var(key, value)?,
            ["LOGGING", "INCLUDE_LOCATION"] => {
                logging.include_location = parse_bool_var(key, value)?;
            }
            ["LOGGING", "SPAN_EVENTS"] => logging.span_events = parse_bool_var(key, value)?,

            ["METRICS", "ENABLED"] => metrics.enabled = parse_bool_var(key, value)?,
            ["METRICS", "NAMESPACE"] => metrics.namespace = value.to_string(),
            ["METRICS", "SUBSYSTEM"] => metrics.subsystem = value.to_string(),

            _ => tracing::debug!(var = key, "ignoring unknown configuration variable"),
        }
        Ok(())
    }
}

fn parse(content: &str, format: &str) -> Result<ServConfig, ConfigError> {
    match format.to_lowercase().as_str() {
        "toml" => Ok(toml::from_str(content)?),
        "json" => Ok(serde_json::from_str(content)?),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

fn parse_int(key: &str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))
}

fn parse_bool_var(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

fn optional_path(value: &str) -> Option<PathBuf> {
    (!value.is_empty()).then(|| PathBuf::from(value))
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn test_loader_defaults() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config, ServConfig::default());
    }

    #[test]
    fn test_loader_with_string_toml() {
        let toml = r#"
            [server]
            name = "files"
            port = 8080
            write_timeout_ms = 2500

            [logging]
            level = "warn"
        "#;

        let config = ConfigLoader::new()
            .with_string(toml, "toml")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.server.name, "files");
        assert_eq!(config.server.port, "8080");
        assert_eq!(config.server_config().write_timeout, Duration::from_millis(2500));
        assert_eq!(config.logging.level, "warn");
        assert!(config.logging.json_format);
    }

    #[test]
    fn test_loader_with_string_json() {
        let json = r#"{"server": {"addr": "127.0.0.1", "port": ":9000"}}"#;
        let config = ConfigLoader::new()
            .with_string(json, "json")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.server.addr, "127.0.0.1");
        assert_eq!(config.port().unwrap().map(u16::from), Some(9000));
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let result = ConfigLoader::new().with_string("[server]\nhttp2 = true\n", "toml");
        assert!(matches!(result, Err(ConfigError::TomlError(_))));
    }

    #[test]
    fn test_unsupported_format() {
        let result = ConfigLoader::new().with_string("", "yaml");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_invalid_port_fails_load() {
        let result = ConfigLoader::new()
            .with_string("[server]\nport = \"abc\"\n", "toml")
            .unwrap()
            .load();
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_missing_file() {
        let result = ConfigLoader::new().with_file("/nonexistent/serv.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));

        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/serv.toml")
            .unwrap()
            .load_unvalidated();
        assert_eq!(config, ServConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_vars(
                "TEST",
                vars(&[
                    ("TEST__SERVER__PORT", "9000"),
                    ("TEST__SERVER__SHUTDOWN_TIMEOUT_SECS", "4"),
                    ("TEST__TLS__CERT_FILE", "/etc/serv/cert.pem"),
                    ("TEST__TLS__VERIFY_CLIENT", "yes"),
                    ("TEST__LOGGING__JSON_FORMAT", "off"),
                    ("TEST__METRICS__NAMESPACE", "files"),
                    ("TEST__UNKNOWN__KEY", "ignored"),
                    ("OTHER__SERVER__PORT", "1"),
                ]),
            )
            .unwrap();

        let config = loader.load_unvalidated();
        assert_eq!(config.server.port, "9000");
        assert_eq!(config.server.shutdown_timeout_secs, 4);
        assert_eq!(config.tls.cert_file, Some(PathBuf::from("/etc/serv/cert.pem")));
        assert!(config.tls.verify_client);
        assert!(!config.logging.json_format);
        assert_eq!(config.metrics.namespace, "files");
    }

    #[test]
    fn test_env_parse_errors() {
        let mut loader = ConfigLoader::new();
        let result = loader.apply_env_var("TEST__SERVER__WRITE_TIMEOUT_MS", "soon", "TEST");
        assert!(matches!(result, Err(ConfigError::EnvParseError { .. })));

        let result = loader.apply_env_var("TEST__TLS__VERIFY_CLIENT", "maybe", "TEST");
        assert!(matches!(result, Err(ConfigError::EnvParseError { .. })));
    }

    #[test]
    fn test_parse_bool() {
        for value in ["true", "TRUE", "1", "yes", "on"] {
            assert_eq!(parse_bool(value), Some(true), "{value}");
        }
        for value in ["false", "False", "0", "no", "off"] {
            assert_eq!(parse_bool(value), Some(false), "{value}");
        }
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_bool(""), None);
    }
}
