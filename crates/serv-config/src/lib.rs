//! # Serv Config
//!
//! Layered configuration for programs built on serv.
//!
//! [`ConfigLoader`] merges defaults, a TOML or JSON file and `PREFIX__SECTION__KEY`
//! environment variables into a [`ServConfig`], which converts into server
//! options, a [`serv_server::Config`] and the telemetry settings.
//!
//! ```
//! use serv_config::ConfigLoader;
//! use std::time::Duration;
//!
//! let config = ConfigLoader::new()
//!     .with_string("[server]\nport = 8080\nidle_timeout_secs = 30\n", "toml")?
//!     .load()?;
//!
//! assert_eq!(config.server_config().idle_timeout, Duration::from_secs(30));
//! # Ok::<(), serv_config::ConfigError>(())
//! ```

#![doc(html_root_url = "https://docs.rs/serv-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::ServConfig;
pub use error::ConfigError;
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::{ServerSection, TlsSection};
