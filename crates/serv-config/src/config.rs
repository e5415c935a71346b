//! The root configuration type.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serv_server::options::{with_addr, with_name, BoxOption};
use serv_server::{Config, Port, TlsFiles};
use serv_telemetry::{LogConfig, MetricsConfig};

use crate::schema::{ServerSection, TlsSection};
use crate::ConfigError;

/// Configuration of a serv program.
///
/// ```toml
/// [server]
/// name = "files"
/// port = 8080
/// read_header_timeout_ms = 2000
/// shutdown_timeout_secs = 10
///
/// [tls]
/// cert_file = "/etc/serv/cert.pem"
/// key_file = "/etc/serv/key.pem"
///
/// [logging]
/// level = "info"
/// json_format = true
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServConfig {
    /// Listener, name, timeouts and limits.
    pub server: ServerSection,

    /// Certificate and key files.
    pub tls: TlsSection,

    /// Structured logging.
    pub logging: LogConfig,

    /// Request metrics.
    pub metrics: MetricsConfig,
}

impl ServConfig {
    /// Defaults with human readable debug logging.
    #[must_use]
    pub fn development() -> Self {
        Self {
            logging: LogConfig::development(),
            ..Self::default()
        }
    }

    /// Defaults with JSON logging.
    #[must_use]
    pub fn production() -> Self {
        Self {
            logging: LogConfig::production(),
            ..Self::default()
        }
    }

    /// Checks values that deserialize fine but cannot be used.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.port()?;

        match (&self.tls.cert_file, &self.tls.key_file) {
            (Some(_), None) => Err(ConfigError::invalid_value(
                "tls.key_file",
                "a key file is required when cert_file is set",
            )),
            (None, Some(_)) => Err(ConfigError::invalid_value(
                "tls.cert_file",
                "a certificate file is required when key_file is set",
            )),
            _ => Ok(()),
        }
    }

    /// The configured port, `None` when not set.
    pub fn port(&self) -> Result<Option<Port>, ConfigError> {
        let port = self.server.port.trim();
        if port.is_empty() {
            return Ok(None);
        }
        Port::parse(port)
            .map(Some)
            .map_err(|err| ConfigError::invalid_value("server.port", err.to_string()))
    }

    /// The server timeouts and limits. Unset values stay zero.
    pub fn server_config(&self) -> Config {
        let server = &self.server;
        Config::builder()
            .read_timeout(Duration::from_millis(server.read_timeout_ms))
            .read_header_timeout(Duration::from_millis(server.read_header_timeout_ms))
            .write_timeout(Duration::from_millis(server.write_timeout_ms))
            .idle_timeout(Duration::from_secs(server.idle_timeout_secs))
            .shutdown_timeout(Duration::from_secs(server.shutdown_timeout_secs))
            .max_header_bytes(server.max_header_bytes)
            .build()
    }

    /// The TLS files as a server option.
    pub fn tls_files(&self) -> TlsFiles {
        TlsFiles {
            ca_cert_file: self.tls.ca_cert_file.clone(),
            cert_file: self.tls.cert_file.clone(),
            key_file: self.tls.key_file.clone(),
            verify_client: self.tls.verify_client,
            insecure_skip_verify: self.tls.insecure_skip_verify,
        }
    }

    /// Server options for everything set in this configuration.
    pub fn server_options(&self) -> Result<Vec<BoxOption>, ConfigError> {
        let mut options: Vec<BoxOption> = Vec::new();
        if !self.server.name.is_empty() {
            options.push(Box::new(with_name(self.server.name.clone())));
        }
        if !self.server.addr.is_empty() {
            options.push(Box::new(with_addr(self.server.addr.clone())));
        }
        if let Some(port) = self.port()? {
            options.push(Box::new(port));
        }
        let config = self.server_config();
        if !config.is_zero() {
            options.push(Box::new(config));
        }
        if !self.tls.is_empty() {
            options.push(Box::new(self.tls_files()));
        }
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_is_valid() {
        let config = ServConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.server_config().is_zero());
        assert!(config.server_options().unwrap().is_empty());
        assert_eq!(config.port().unwrap(), None);
    }

    #[test]
    fn test_presets() {
        assert!(!ServConfig::development().logging.json_format);
        assert!(ServConfig::production().logging.json_format);
    }

    #[test]
    fn test_port_forms() {
        let mut config = ServConfig::default();
        for (input, want) in [("8080", 8080), (":443", 443), ("0x50", 80)] {
            config.server.port = input.to_string();
            assert_eq!(config.port().unwrap(), Some(Port::new(want)), "{input}");
        }
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let mut config = ServConfig::default();
        config.server.port = "http".to_string();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "server.port"));
    }

    #[test]
    fn test_cert_without_key_is_rejected() {
        let mut config = ServConfig::default();
        config.tls.cert_file = Some(PathBuf::from("cert.pem"));
        assert!(config.validate().is_err());

        config.tls.cert_file = None;
        config.tls.key_file = Some(PathBuf::from("key.pem"));
        assert!(config.validate().is_err());

        config.tls.cert_file = Some(PathBuf::from("cert.pem"));
        assert!(config.validate().is_ok());
        assert!(config.tls_files().has_key_pair());
    }

    #[test]
    fn test_server_config_conversion() {
        let mut config = ServConfig::default();
        config.server.read_header_timeout_ms = 1500;
        config.server.shutdown_timeout_secs = 3;
        config.server.max_header_bytes = 4096;

        let server = config.server_config();
        assert_eq!(server.read_header_timeout, Duration::from_millis(1500));
        assert_eq!(server.shutdown_timeout, Duration::from_secs(3));
        assert_eq!(server.max_header_bytes, 4096);
        assert_eq!(server.read_timeout, Duration::ZERO);
    }

    #[test]
    fn test_server_options() {
        let mut config = ServConfig::default();
        config.server.name = "files".to_string();
        config.server.port = "8080".to_string();
        config.server.idle_timeout_secs = 30;
        assert_eq!(config.server_options().unwrap().len(), 3);
    }
}
