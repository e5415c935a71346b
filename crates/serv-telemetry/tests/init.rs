use serv_telemetry::{init_logging, LogConfig, TelemetryError};

#[test]
fn test_second_initialization_is_reported() {
    init_logging(&LogConfig::production()).unwrap();
    tracing::info!("logging initialized");

    let err = init_logging(&LogConfig::development()).unwrap_err();
    assert!(matches!(err, TelemetryError::AlreadyInitialized));
}
