//! Lifecycle event logging.
//!
//! A [`Logger`] receives the server's start, shutdown and close events. When
//! no logger is configured the server installs [`NopLogger`].
//! [`DefaultLogger`] formats each event as one line prefixed with `server` or
//! `server <name>` and hands it to a [`LineWriter`].
//!
//! A logger may additionally act as an [`ErrorLoggerProvider`]; the server
//! then routes the HTTP primitive's internal errors (failed accepts, broken
//! connections, TLS handshakes) to the sink it provides, unless an explicit
//! error logger was configured.

use std::error::Error;
use std::fmt;
use std::sync::Arc;

use serv_core::{LineWriter, TracingWriter};

/// Receives server lifecycle events.
pub trait Logger: Send + Sync {
    /// The server started listening on `addr`.
    fn log_server_start(&self, name: &str, addr: &str);

    /// The server started listening on `addr` with TLS.
    fn log_server_start_tls(&self, name: &str, addr: &str, cert_file: &str, key_file: &str);

    /// A graceful shutdown began.
    fn log_server_shutdown(&self, name: &str);

    /// A forced close began.
    fn log_server_close(&self, name: &str);

    /// Returns this logger as an [`ErrorLoggerProvider`], when it is one.
    fn as_error_logger_provider(&self) -> Option<&dyn ErrorLoggerProvider> {
        None
    }
}

/// Receives errors from the HTTP primitive.
pub trait ErrorLogger: Send + Sync {
    /// Logs `err` with a short description of what failed.
    fn log_error(&self, context: &str, err: &(dyn Error + 'static));
}

/// Supplies an [`ErrorLogger`].
pub trait ErrorLoggerProvider {
    /// Returns the error sink.
    fn error_logger(&self) -> Arc<dyn ErrorLogger>;
}

/// Discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopLogger;

impl Logger for NopLogger {
    fn log_server_start(&self, _name: &str, _addr: &str) {}

    fn log_server_start_tls(&self, _name: &str, _addr: &str, _cert_file: &str, _key_file: &str) {}

    fn log_server_shutdown(&self, _name: &str) {}

    fn log_server_close(&self, _name: &str) {}
}

impl ErrorLogger for NopLogger {
    fn log_error(&self, _context: &str, _err: &(dyn Error + 'static)) {}
}

/// Emits primitive errors as `tracing` warnings.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingErrorLogger;

impl ErrorLogger for TracingErrorLogger {
    fn log_error(&self, context: &str, err: &(dyn Error + 'static)) {
        tracing::warn!(target: "serv::server", error = %err, "{context}");
    }
}

/// Writes one text line per event to a [`LineWriter`].
#[derive(Clone)]
pub struct DefaultLogger {
    out: Arc<dyn LineWriter>,
}

impl DefaultLogger {
    /// Creates a logger writing to `tracing`.
    pub fn new() -> Self {
        Self::with_writer(Arc::new(TracingWriter::server()))
    }

    /// Creates a logger writing to `out`.
    pub fn with_writer(out: Arc<dyn LineWriter>) -> Self {
        Self { out }
    }

    fn line(&self, name: &str, message: fmt::Arguments<'_>) {
        let line = if name.is_empty() {
            format!("server {message}")
        } else {
            format!("server {name} {message}")
        };
        self.out.write_line(&line);
    }
}

impl Default for DefaultLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DefaultLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultLogger").finish_non_exhaustive()
    }
}

impl Logger for DefaultLogger {
    fn log_server_start(&self, name: &str, addr: &str) {
        self.line(name, format_args!("starting on {addr}"));
    }

    fn log_server_start_tls(&self, name: &str, addr: &str, cert_file: &str, key_file: &str) {
        if cert_file.is_empty() && key_file.is_empty() {
            self.line(name, format_args!("starting on {addr} (tls)"));
        } else {
            self.line(
                name,
                format_args!("starting on {addr} (tls, cert: {cert_file}, key: {key_file})"),
            );
        }
    }

    fn log_server_shutdown(&self, name: &str) {
        self.line(name, format_args!("shutting down"));
    }

    fn log_server_close(&self, name: &str) {
        self.line(name, format_args!("closing"));
    }

    fn as_error_logger_provider(&self) -> Option<&dyn ErrorLoggerProvider> {
        Some(self)
    }
}

impl ErrorLoggerProvider for DefaultLogger {
    fn error_logger(&self) -> Arc<dyn ErrorLogger> {
        Arc::new(LineErrorLogger {
            out: Arc::clone(&self.out),
        })
    }
}

struct LineErrorLogger {
    out: Arc<dyn LineWriter>,
}

impl ErrorLogger for LineErrorLogger {
    fn log_error(&self, context: &str, err: &(dyn Error + 'static)) {
        self.out.write_line(&format!("server error: {context}: {err}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serv_core::MemoryWriter;

    fn logger() -> (DefaultLogger, Arc<MemoryWriter>) {
        let out = Arc::new(MemoryWriter::new());
        (DefaultLogger::with_writer(out.clone()), out)
    }

    #[test]
    fn test_default_logger_without_name() {
        let (log, out) = logger();
        log.log_server_start("", ":8080");
        log.log_server_shutdown("");
        log.log_server_close("");

        assert_eq!(
            out.lines(),
            vec![
                "server starting on :8080",
                "server shutting down",
                "server closing",
            ]
        );
    }

    #[test]
    fn test_default_logger_with_name() {
        let (log, out) = logger();
        log.log_server_start_tls("api", ":443", "cert.pem", "key.pem");
        log.log_server_start_tls("api", ":443", "", "");

        assert_eq!(
            out.lines(),
            vec![
                "server api starting on :443 (tls, cert: cert.pem, key: key.pem)",
                "server api starting on :443 (tls)",
            ]
        );
    }

    #[test]
    fn test_default_logger_provides_error_logger() {
        let (log, out) = logger();
        let provider = log.as_error_logger_provider().unwrap();
        let err = std::io::Error::other("boom");
        provider.error_logger().log_error("accept", &err);

        assert_eq!(out.lines(), vec!["server error: accept: boom"]);
    }

    #[test]
    fn test_nop_logger_is_not_a_provider() {
        assert!(NopLogger.as_error_logger_provider().is_none());
    }
}
