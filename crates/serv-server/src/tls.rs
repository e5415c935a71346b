//! TLS material and configuration.
//!
//! [`TlsConfig`] collects everything needed to build a
//! [`rustls::ServerConfig`]: protocol versions, cipher suites, key exchange
//! groups, certificates, client CA pool and client authentication mode.
//!
//! Certificates come from [`CertificateLoader`]s. Applying a loader installs
//! it as the on-demand certificate resolver when the config has none yet;
//! otherwise the certificate is loaded immediately and appended to the static
//! certificate list. A config therefore has at most one dynamic resolver and
//! any number of static certificates.
//!
//! # Example
//!
//! ```rust,no_run
//! use serv_server::tls::{TlsConfig, TlsKeyPair, TlsOption};
//!
//! let mut config = TlsConfig::default_profile();
//! TlsKeyPair::new("cert.pem", "key.pem").apply_tls(&mut config)?;
//! let server_config = config.build_server_config()?;
//! # Ok::<(), serv_server::tls::TlsError>(())
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::crypto::ring as provider;
use rustls::crypto::{CryptoProvider, SupportedKxGroup};
use rustls::pki_types::CertificateDer;
use rustls::server::{ClientHello, ResolvesServerCert, WebPkiClientVerifier};
use rustls::sign::CertifiedKey;
use rustls::{RootCertStore, ServerConfig, SupportedCipherSuite, SupportedProtocolVersion};
use thiserror::Error;

/// Errors produced while loading TLS material or building a TLS config.
#[derive(Debug, Error)]
pub enum TlsError {
    /// A file could not be read.
    #[error("failed to read {path}")]
    Io {
        /// The file that failed to read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// PEM data could not be decoded.
    #[error("failed to decode pem data")]
    Pem(#[source] std::io::Error),

    /// PEM data contained no certificate.
    #[error("no certificate found in pem data")]
    MissingCertificate,

    /// PEM data contained no private key.
    #[error("no private key found in pem data")]
    MissingPrivateKey,

    /// The CA file did not contain any usable certificate.
    #[error("failed to append certificate to root ca pool")]
    AppendRootCaFailure,

    /// No certificate or certificate resolver was configured.
    #[error("tls config has no certificates")]
    NoCertificates,

    /// rustls rejected the key or configuration.
    #[error(transparent)]
    Rustls(#[from] rustls::Error),

    /// The client certificate verifier could not be built.
    #[error("failed to build client certificate verifier")]
    ClientVerifier(#[from] rustls::server::VerifierBuilderError),
}

/// Minimum TLS protocol version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TlsVersion {
    /// TLS 1.2 and 1.3.
    #[default]
    Tls12,
    /// TLS 1.3 only.
    Tls13,
}

/// Client certificate authentication mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClientAuth {
    /// Client certificates are not requested.
    #[default]
    None,
    /// Client certificates are requested and verified when presented.
    Request,
    /// Client certificates are required and verified (mutual TLS).
    RequireAndVerify,
}

/// Cipher suites of the default profile, all AEAD with (EC)DHE key exchange.
pub fn default_cipher_suites() -> Vec<SupportedCipherSuite> {
    vec![
        provider::cipher_suite::TLS13_AES_256_GCM_SHA384,
        provider::cipher_suite::TLS13_AES_128_GCM_SHA256,
        provider::cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
        provider::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384,
        provider::cipher_suite::TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384,
        provider::cipher_suite::TLS_ECDHE_ECDSA_WITH_CHACHA20_POLY1305_SHA256,
        provider::cipher_suite::TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256,
        provider::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
        provider::cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
    ]
}

/// Key exchange groups of the default profile, in preference order.
pub fn default_kx_groups() -> Vec<&'static dyn SupportedKxGroup> {
    vec![provider::kx_group::SECP256R1, provider::kx_group::X25519]
}

/// TLS settings for a server.
#[derive(Clone)]
pub struct TlsConfig {
    /// Lowest protocol version accepted.
    pub min_version: TlsVersion,
    /// Allowed cipher suites; empty means the provider defaults.
    pub cipher_suites: Vec<SupportedCipherSuite>,
    /// Key exchange groups in preference order; empty means the provider
    /// defaults.
    pub kx_groups: Vec<&'static dyn SupportedKxGroup>,
    /// Client certificate authentication mode.
    pub client_auth: ClientAuth,
    /// Skips client certificate verification. Only meant for testing.
    pub insecure_skip_verify: bool,
    /// ALPN protocols offered during the handshake.
    pub alpn_protocols: Vec<Vec<u8>>,
    certificates: Vec<Arc<CertifiedKey>>,
    resolver: Option<Arc<dyn ResolvesServerCert>>,
    client_cas: RootCertStore,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            min_version: TlsVersion::Tls12,
            cipher_suites: Vec::new(),
            kx_groups: Vec::new(),
            client_auth: ClientAuth::None,
            insecure_skip_verify: false,
            alpn_protocols: Vec::new(),
            certificates: Vec::new(),
            resolver: None,
            client_cas: RootCertStore::empty(),
        }
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("min_version", &self.min_version)
            .field("cipher_suites", &self.cipher_suites.len())
            .field("client_auth", &self.client_auth)
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("certificates", &self.certificates.len())
            .field("resolver", &self.resolver.is_some())
            .field("client_cas", &self.client_cas.len())
            .finish_non_exhaustive()
    }
}

impl TlsConfig {
    /// Returns the modern default profile: TLS 1.2 or later, P-256 and
    /// X25519 key exchange, AEAD cipher suites only.
    pub fn default_profile() -> Self {
        Self {
            cipher_suites: default_cipher_suites(),
            kx_groups: default_kx_groups(),
            ..Self::default()
        }
    }

    /// Reports whether a certificate or certificate resolver is configured.
    pub fn has_certificates(&self) -> bool {
        !self.certificates.is_empty() || self.resolver.is_some()
    }

    /// The static certificates.
    pub fn certificates(&self) -> &[Arc<CertifiedKey>] {
        &self.certificates
    }

    /// Appends a static certificate.
    pub fn add_certificate(&mut self, certificate: impl Into<Arc<CertifiedKey>>) {
        self.certificates.push(certificate.into());
    }

    /// The on-demand certificate resolver, if any.
    pub fn certificate_resolver(&self) -> Option<&Arc<dyn ResolvesServerCert>> {
        self.resolver.as_ref()
    }

    /// Sets the on-demand certificate resolver, replacing any existing one.
    pub fn set_certificate_resolver(&mut self, resolver: Arc<dyn ResolvesServerCert>) {
        self.resolver = Some(resolver);
    }

    /// The pool of CAs used to verify client certificates.
    pub fn client_cas(&self) -> &RootCertStore {
        &self.client_cas
    }

    /// Mutable access to the client CA pool.
    pub fn client_cas_mut(&mut self) -> &mut RootCertStore {
        &mut self.client_cas
    }

    /// The crypto provider restricted to the configured suites and groups.
    pub fn crypto_provider(&self) -> CryptoProvider {
        let mut crypto = provider::default_provider();
        if !self.cipher_suites.is_empty() {
            crypto.cipher_suites.clone_from(&self.cipher_suites);
        }
        if !self.kx_groups.is_empty() {
            crypto.kx_groups.clone_from(&self.kx_groups);
        }
        crypto
    }

    /// Builds the rustls server configuration.
    pub fn build_server_config(&self) -> Result<ServerConfig, TlsError> {
        if !self.has_certificates() {
            return Err(TlsError::NoCertificates);
        }

        let crypto = Arc::new(self.crypto_provider());
        let versions: &[&'static SupportedProtocolVersion] = match self.min_version {
            TlsVersion::Tls12 => &[&rustls::version::TLS13, &rustls::version::TLS12],
            TlsVersion::Tls13 => &[&rustls::version::TLS13],
        };
        let builder = ServerConfig::builder_with_provider(Arc::clone(&crypto))
            .with_protocol_versions(versions)?;

        let builder = match self.client_auth {
            ClientAuth::None => builder.with_no_client_auth(),
            _ if self.insecure_skip_verify => builder.with_no_client_auth(),
            mode => {
                let roots = Arc::new(self.client_cas.clone());
                let mut verifier = WebPkiClientVerifier::builder_with_provider(roots, crypto);
                if mode == ClientAuth::Request {
                    verifier = verifier.allow_unauthenticated();
                }
                builder.with_client_cert_verifier(verifier.build()?)
            }
        };

        let mut config = builder.with_cert_resolver(Arc::new(CertResolver {
            dynamic: self.resolver.clone(),
            certificates: self.certificates.clone(),
        }));
        config.alpn_protocols.clone_from(&self.alpn_protocols);
        Ok(config)
    }
}

// Asks the dynamic resolver first and falls back to the first static
// certificate.
#[derive(Debug)]
struct CertResolver {
    dynamic: Option<Arc<dyn ResolvesServerCert>>,
    certificates: Vec<Arc<CertifiedKey>>,
}

impl ResolvesServerCert for CertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.dynamic
            .as_ref()
            .and_then(|resolver| resolver.resolve(client_hello))
            .or_else(|| self.certificates.first().cloned())
    }
}

/// Modifies a [`TlsConfig`].
pub trait TlsOption: Send + Sync {
    /// Applies the option to `config`.
    fn apply_tls(&self, config: &mut TlsConfig) -> Result<(), TlsError>;
}

impl<F> TlsOption for F
where
    F: Fn(&mut TlsConfig) -> Result<(), TlsError> + Send + Sync,
{
    fn apply_tls(&self, config: &mut TlsConfig) -> Result<(), TlsError> {
        self(config)
    }
}

/// Loads a certificate with its private key.
pub trait CertificateLoader: Send + Sync + fmt::Debug {
    /// Loads the certificate. Returns `None` when the loader is empty.
    fn load_certificate(&self) -> Result<Option<CertifiedKey>, TlsError>;
}

/// Resolves certificates by calling a [`CertificateLoader`] on every
/// handshake, which picks up rotated certificate files.
#[derive(Debug)]
pub struct LoaderResolver<L> {
    loader: L,
}

impl<L: CertificateLoader> LoaderResolver<L> {
    /// Creates a resolver backed by `loader`.
    pub fn new(loader: L) -> Self {
        Self { loader }
    }
}

impl<L: CertificateLoader> ResolvesServerCert for LoaderResolver<L> {
    fn resolve(&self, _client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        match self.loader.load_certificate() {
            Ok(certificate) => certificate.map(Arc::new),
            Err(err) => {
                tracing::warn!(error = %err, loader = ?self.loader, "failed to load certificate");
                None
            }
        }
    }
}

fn apply_loader<L>(loader: &L, config: &mut TlsConfig) -> Result<(), TlsError>
where
    L: CertificateLoader + Clone + 'static,
{
    if config.resolver.is_none() {
        config.resolver = Some(Arc::new(LoaderResolver::new(loader.clone())));
        return Ok(());
    }
    if let Some(certificate) = loader.load_certificate()? {
        config.add_certificate(certificate);
    }
    Ok(())
}

/// A certificate and private key read from PEM files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsKeyPair {
    /// Path to the PEM encoded certificate chain.
    pub cert_file: PathBuf,
    /// Path to the PEM encoded private key.
    pub key_file: PathBuf,
}

impl TlsKeyPair {
    /// Creates a key pair from file paths.
    pub fn new(cert_file: impl Into<PathBuf>, key_file: impl Into<PathBuf>) -> Self {
        Self {
            cert_file: cert_file.into(),
            key_file: key_file.into(),
        }
    }

    /// Reports whether both paths are empty.
    pub fn is_empty(&self) -> bool {
        self.cert_file.as_os_str().is_empty() && self.key_file.as_os_str().is_empty()
    }
}

impl CertificateLoader for TlsKeyPair {
    fn load_certificate(&self) -> Result<Option<CertifiedKey>, TlsError> {
        if self.is_empty() {
            return Ok(None);
        }
        let cert = read_file(&self.cert_file)?;
        let key = read_file(&self.key_file)?;
        certified_key(&cert, &key).map(Some)
    }
}

impl TlsOption for TlsKeyPair {
    fn apply_tls(&self, config: &mut TlsConfig) -> Result<(), TlsError> {
        if self.is_empty() {
            return Ok(());
        }
        apply_loader(self, config)
    }
}

/// A certificate and private key held in memory as PEM blocks.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TlsPemBlocks {
    /// PEM encoded certificate chain.
    pub cert: Vec<u8>,
    /// PEM encoded private key.
    pub key: Vec<u8>,
}

impl fmt::Debug for TlsPemBlocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsPemBlocks")
            .field("cert", &self.cert.len())
            .field("key", &"<redacted>")
            .finish()
    }
}

impl TlsPemBlocks {
    /// Creates PEM blocks from certificate and key bytes.
    pub fn new(cert: impl Into<Vec<u8>>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            cert: cert.into(),
            key: key.into(),
        }
    }

    /// Reports whether both blocks are empty.
    pub fn is_empty(&self) -> bool {
        self.cert.is_empty() && self.key.is_empty()
    }
}

impl CertificateLoader for TlsPemBlocks {
    fn load_certificate(&self) -> Result<Option<CertifiedKey>, TlsError> {
        if self.is_empty() {
            return Ok(None);
        }
        certified_key(&self.cert, &self.key).map(Some)
    }
}

impl TlsOption for TlsPemBlocks {
    fn apply_tls(&self, config: &mut TlsConfig) -> Result<(), TlsError> {
        if self.is_empty() {
            return Ok(());
        }
        apply_loader(self, config)
    }
}

/// TLS material referenced by file paths, typically read from configuration
/// or command-line flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsFiles {
    /// Root CA file used to verify client certificates.
    pub ca_cert_file: Option<PathBuf>,
    /// The server certificate file.
    pub cert_file: Option<PathBuf>,
    /// The server private key file.
    pub key_file: Option<PathBuf>,
    /// Enables mutual TLS.
    pub verify_client: bool,
    /// Disables client certificate verification. Only meant for testing.
    pub insecure_skip_verify: bool,
}

impl TlsFiles {
    /// Reports whether both a certificate and a key file are set.
    pub fn has_key_pair(&self) -> bool {
        self.cert_file.is_some() && self.key_file.is_some()
    }
}

impl TlsOption for TlsFiles {
    fn apply_tls(&self, config: &mut TlsConfig) -> Result<(), TlsError> {
        if let Some(ca_cert_file) = &self.ca_cert_file {
            append_root_ca(config, ca_cert_file)?;
        }

        config.insecure_skip_verify = self.insecure_skip_verify;
        if self.verify_client {
            config.client_auth = ClientAuth::RequireAndVerify;
        }

        match (&self.cert_file, &self.key_file) {
            (Some(cert), Some(key)) => TlsKeyPair::new(cert, key).apply_tls(config),
            _ => Ok(()),
        }
    }
}

/// Reads a PEM file and adds its certificates to the client CA pool.
///
/// Fails with [`TlsError::AppendRootCaFailure`] when the file holds no
/// certificate that can be added to the pool.
pub fn append_root_ca(config: &mut TlsConfig, path: impl AsRef<Path>) -> Result<(), TlsError> {
    let pem = read_file(path.as_ref())?;
    let certs: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut pem.as_slice())
        .filter_map(Result::ok)
        .collect();

    let (added, ignored) = config.client_cas.add_parsable_certificates(certs);
    if added == 0 {
        return Err(TlsError::AppendRootCaFailure);
    }
    if ignored > 0 {
        tracing::debug!(ignored, path = %path.as_ref().display(), "ignored unparsable ca certificates");
    }
    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>, TlsError> {
    fs::read(path).map_err(|source| TlsError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn certified_key(cert_pem: &[u8], key_pem: &[u8]) -> Result<CertifiedKey, TlsError> {
    let certs = rustls_pemfile::certs(&mut &*cert_pem)
        .collect::<Result<Vec<_>, _>>()
        .map_err(TlsError::Pem)?;
    if certs.is_empty() {
        return Err(TlsError::MissingCertificate);
    }

    let key = rustls_pemfile::private_key(&mut &*key_pem)
        .map_err(TlsError::Pem)?
        .ok_or(TlsError::MissingPrivateKey)?;
    let signing_key = provider::sign::any_supported_type(&key)?;

    Ok(CertifiedKey::new(certs, signing_key))
}
