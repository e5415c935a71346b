//! Configuration sections.

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

/// The `[server]` section.
///
/// Zero timeouts and sizes are "not set"; the server then uses its own
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    /// Name used in logs and access records.
    pub name: String,

    /// Address to listen on, e.g. `127.0.0.1:8080` or `:8080`.
    pub addr: String,

    /// Port applied to `addr`. Accepts a number or a string such as `":8080"`.
    #[serde(deserialize_with = "port_value")]
    pub port: String,

    /// Maximum duration for reading the entire request, in milliseconds.
    pub read_timeout_ms: u64,

    /// Maximum duration for reading the request headers, in milliseconds.
    pub read_header_timeout_ms: u64,

    /// Maximum duration for writing the response, in milliseconds.
    pub write_timeout_ms: u64,

    /// Keep-alive idle timeout, in seconds.
    pub idle_timeout_secs: u64,

    /// Upper bound for a graceful shutdown, in seconds.
    pub shutdown_timeout_secs: u64,

    /// Maximum size of the request headers in bytes.
    pub max_header_bytes: usize,
}

/// The `[tls]` section. Paths are read when the server starts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsSection {
    /// Root CA used to verify client certificates.
    pub ca_cert_file: Option<PathBuf>,

    /// Server certificate, PEM encoded.
    pub cert_file: Option<PathBuf>,

    /// Server private key, PEM encoded.
    pub key_file: Option<PathBuf>,

    /// Require and verify client certificates.
    pub verify_client: bool,

    /// Accept any client certificate. Only meant for testing.
    pub insecure_skip_verify: bool,
}

impl TlsSection {
    /// Reports whether any TLS material is configured.
    pub fn is_empty(&self) -> bool {
        self.ca_cert_file.is_none() && self.cert_file.is_none() && self.key_file.is_none()
    }
}

fn port_value<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum PortValue {
        Number(u64),
        Text(String),
    }

    Ok(match PortValue::deserialize(deserializer)? {
        PortValue::Number(port) => port.to_string(),
        PortValue::Text(port) => port,
    })
}
