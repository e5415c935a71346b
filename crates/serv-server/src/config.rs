//! Server timeouts and size limits.
//!
//! [`Config`] is a plain value: every zero field means "not set". The server
//! substitutes [`Config::defaults()`] when it starts with an all-zero config,
//! and [`Config::apply_to`] only ever copies the fields that are set.
//!
//! # Example
//!
//! ```rust
//! use serv_server::Config;
//! use std::time::Duration;
//!
//! let config = Config::builder()
//!     .read_timeout(Duration::from_secs(3))
//!     .shutdown_timeout(Duration::from_secs(10))
//!     .build();
//!
//! assert_eq!(config.read_timeout, Duration::from_secs(3));
//! assert_eq!(config.write_timeout, Duration::ZERO);
//! ```

use std::time::Duration;

/// Default maximum duration for reading an entire request.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Default maximum duration for reading request headers.
pub const DEFAULT_READ_HEADER_TIMEOUT: Duration = Duration::from_secs(2);

/// Default maximum duration before timing out writes of the response.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default maximum time to wait for the next request on a kept-alive
/// connection.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Default maximum duration of a graceful shutdown.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

/// Default maximum size of request headers, 10 KiB.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 10 << 10;

/// Smallest header limit the HTTP/1 parser can enforce, 8 KiB. Lower
/// settings are raised to this value.
pub const MIN_MAX_HEADER_BYTES: usize = 8 << 10;

/// Timeouts and size limits of a server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Config {
    /// Maximum duration for reading the entire request, including the body.
    pub read_timeout: Duration,

    /// Maximum duration for reading the request headers.
    pub read_header_timeout: Duration,

    /// Maximum duration a handler may take to produce its response.
    pub write_timeout: Duration,

    /// Maximum time to wait for the next request when keep-alives are
    /// enabled.
    pub idle_timeout: Duration,

    /// Upper bound for a graceful shutdown.
    pub shutdown_timeout: Duration,

    /// Maximum number of bytes read while parsing request headers.
    ///
    /// Values below [`MIN_MAX_HEADER_BYTES`] are enforced as that minimum.
    pub max_header_bytes: usize,
}

/// Limits enforced by the HTTP primitive. A zero field disables the limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
    /// See [`Config::read_timeout`].
    pub read_timeout: Duration,
    /// See [`Config::read_header_timeout`].
    pub read_header_timeout: Duration,
    /// See [`Config::write_timeout`].
    pub write_timeout: Duration,
    /// See [`Config::idle_timeout`].
    pub idle_timeout: Duration,
    /// See [`Config::max_header_bytes`].
    pub max_header_bytes: usize,
}

impl Config {
    /// Returns a config with every field set to its default.
    pub const fn defaults() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            read_header_timeout: DEFAULT_READ_HEADER_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
        }
    }

    /// Creates a new config builder starting from the zero config.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Sets every zero field to its default value.
    pub fn fill_defaults(&mut self) -> &mut Self {
        let defaults = Self::defaults();
        if self.read_timeout.is_zero() {
            self.read_timeout = defaults.read_timeout;
        }
        if self.read_header_timeout.is_zero() {
            self.read_header_timeout = defaults.read_header_timeout;
        }
        if self.write_timeout.is_zero() {
            self.write_timeout = defaults.write_timeout;
        }
        if self.idle_timeout.is_zero() {
            self.idle_timeout = defaults.idle_timeout;
        }
        if self.shutdown_timeout.is_zero() {
            self.shutdown_timeout = defaults.shutdown_timeout;
        }
        if self.max_header_bytes == 0 {
            self.max_header_bytes = defaults.max_header_bytes;
        }
        self
    }

    /// Reports whether every field is zero.
    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Copies the non-zero fields onto `limits`, leaving the others as they
    /// are. `max_header_bytes` is raised to [`MIN_MAX_HEADER_BYTES`].
    pub fn apply_to(&self, limits: &mut Limits) {
        if !self.read_timeout.is_zero() {
            limits.read_timeout = self.read_timeout;
        }
        if !self.read_header_timeout.is_zero() {
            limits.read_header_timeout = self.read_header_timeout;
        }
        if !self.write_timeout.is_zero() {
            limits.write_timeout = self.write_timeout;
        }
        if !self.idle_timeout.is_zero() {
            limits.idle_timeout = self.idle_timeout;
        }
        if self.max_header_bytes != 0 {
            limits.max_header_bytes = self.max_header_bytes.max(MIN_MAX_HEADER_BYTES);
        }
    }
}

/// Builder for [`Config`].
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Starts from [`Config::defaults()`] instead of the zero config.
    #[must_use]
    pub fn with_defaults(mut self) -> Self {
        self.config = Config::defaults();
        self
    }

    /// Sets the read timeout.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// Sets the read header timeout.
    #[must_use]
    pub fn read_header_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_header_timeout = timeout;
        self
    }

    /// Sets the write timeout.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    /// Sets the idle timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Sets the shutdown timeout.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    /// Sets the maximum header size in bytes; see
    /// [`Config::max_header_bytes`] for the enforced minimum.
    #[must_use]
    pub fn max_header_bytes(mut self, bytes: usize) -> Self {
        self.config.max_header_bytes = bytes;
        self
    }

    /// Builds the config.
    #[must_use]
    pub fn build(self) -> Config {
        self.config
    }
}
