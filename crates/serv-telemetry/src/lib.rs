//! Logging and metrics setup for serv programs.
//!
//! - [`init_logging`] installs a `tracing-subscriber` registry configured by
//!   a [`LogConfig`]; `RUST_LOG` overrides the configured level.
//! - [`init_metrics`] prepares the [`FacadeRecorder`](serv_middleware::FacadeRecorder)
//!   for the metrics middleware.
//!
//! Library crates only emit `tracing` events and `metrics` measurements; the
//! embedding program decides where they go.

#![doc(html_root_url = "https://docs.rs/serv-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{create_env_filter, init_logging, LogConfig};
pub use self::metrics::{init_metrics, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
