use std::io::Write;
use std::time::Duration;

use serv_config::{ConfigError, ConfigLoader};

fn write_file(suffix: &str, content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn test_toml_file() {
    let file = write_file(
        ".toml",
        r#"
        [server]
        name = "files"
        addr = "127.0.0.1"
        port = 8443
        read_header_timeout_ms = 1000

        [tls]
        cert_file = "cert.pem"
        key_file = "key.pem"
        verify_client = true
        "#,
    );

    let loader = ConfigLoader::new().with_file(file.path()).unwrap();
    assert_eq!(loader.source(), Some(file.path()));

    let config = loader.load().unwrap();
    assert_eq!(config.server.name, "files");
    assert_eq!(config.server_config().read_header_timeout, Duration::from_secs(1));
    assert!(config.tls_files().has_key_pair());
    assert!(config.tls_files().verify_client);
    assert_eq!(config.server_options().unwrap().len(), 5);
}

#[test]
fn test_json_file() {
    let file = write_file(".json", r#"{"logging": {"enabled": false}}"#);
    let config = ConfigLoader::new().with_file(file.path()).unwrap().load().unwrap();
    assert!(!config.logging.enabled);
}

#[test]
fn test_file_with_key_but_no_cert() {
    let file = write_file(".toml", "[tls]\nkey_file = \"key.pem\"\n");
    let err = ConfigLoader::new()
        .with_file(file.path())
        .unwrap()
        .load()
        .unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "tls.cert_file"));
}

#[test]
fn test_unknown_extension() {
    let file = write_file(".ini", "port = 80");
    let err = ConfigLoader::new().with_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
}
