//! Request metrics setup.
//!
//! serv records request metrics through the `metrics` crate facade. This
//! module builds the [`FacadeRecorder`] used by the metrics middleware and
//! registers the metric descriptions. Installing an exporter is left to the
//! application.

use serde::{Deserialize, Serialize};
use serv_middleware::metrics::{FacadeRecorder, DEFAULT_SUBSYSTEM};

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MetricsConfig {
    /// Whether request metrics are collected.
    pub enabled: bool,

    /// Metric name prefix, e.g. the service name.
    pub namespace: String,

    /// Second part of the metric names.
    pub subsystem: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "serv".to_string(),
            subsystem: DEFAULT_SUBSYSTEM.to_string(),
        }
    }
}

/// Builds the recorder for `config` and registers its metric descriptions.
///
/// Returns `None` when metrics are disabled.
pub fn init_metrics(config: &MetricsConfig) -> Option<FacadeRecorder> {
    if !config.enabled {
        return None;
    }
    let recorder = FacadeRecorder::with_subsystem(&config.namespace, &config.subsystem);
    recorder.describe();
    tracing::debug!(
        active_requests = recorder.active_requests_name(),
        "registered request metric descriptions"
    );
    Some(recorder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_names() {
        let recorder = init_metrics(&MetricsConfig::default()).unwrap();
        assert_eq!(recorder.active_requests_name(), "serv_http_server_active_requests");
        assert_eq!(recorder.duration_name(), "serv_http_server_duration_ms");
    }

    #[test]
    fn test_disabled() {
        let config = MetricsConfig {
            enabled: false,
            ..MetricsConfig::default()
        };
        assert!(init_metrics(&config).is_none());
    }
}
