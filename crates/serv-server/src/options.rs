//! Server options.
//!
//! A [`ServerOption`] is one configuration step applied to a server's
//! [`Settings`] before it starts. Options are applied in order; every
//! failure is collected so a caller sees all problems at once.
//!
//! ```rust
//! use serv_server::options::{with_handler, with_name, with_options};
//! use serv_server::{Port, Server};
//! use serv_core::NoContent;
//!
//! let server = Server::builder()
//!     .option(with_options(vec![Box::new(with_name("api")), Box::new(Port::new(8080))]))
//!     .option(with_handler(NoContent))
//!     .build()?;
//! assert_eq!(server.name(), "api");
//! # Ok::<(), serv_server::ServerError>(())
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use rustls::server::ResolvesServerCert;
use serv_core::{Handler, Middleware, SharedHandler, SharedMiddleware};

use crate::config::Config;
use crate::error::ServerError;
use crate::logger::{DefaultLogger, ErrorLogger, Logger};
use crate::port::Port;
use crate::router::{RoutesRegisterer, ServeMux};
use crate::tls::{TlsConfig, TlsFiles, TlsOption};

/// One configuration step for a server.
pub trait ServerOption: Send + Sync {
    /// Applies the option.
    fn apply(&self, settings: &mut Settings) -> Result<(), ServerError>;
}

impl<F> ServerOption for F
where
    F: Fn(&mut Settings) -> Result<(), ServerError> + Send + Sync,
{
    fn apply(&self, settings: &mut Settings) -> Result<(), ServerError> {
        self(settings)
    }
}

/// A boxed option.
pub type BoxOption = Box<dyn ServerOption>;

/// The state of a connection, reported to the [`with_conn_state`] hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnState {
    /// The connection was just accepted.
    New,
    /// A request is being served.
    Active,
    /// Waiting for the next request on a kept-alive connection.
    Idle,
    /// The connection is closed.
    Closed,
}

/// Hook called on every connection state change.
pub type ConnStateHook = Arc<dyn Fn(SocketAddr, ConnState) + Send + Sync>;

/// Everything options can change.
///
/// The fields under "long-lived" survive a restart of the server unchanged;
/// the rest is re-read every time the server starts.
pub struct Settings {
    /// Timeouts and limits; the defaults are used when this is zero.
    pub config: Config,
    /// The address to listen on.
    pub addr: String,
    /// The root handler; the settings' own [`ServeMux`] when `None`.
    pub handler: Option<SharedHandler>,
    /// The server name.
    pub name: String,
    /// The lifecycle logger; [`NopLogger`](crate::NopLogger) when `None`.
    pub logger: Option<Arc<dyn Logger>>,
    /// Middleware wrapped around the handler, outermost first.
    pub middleware: Vec<SharedMiddleware>,
    /// The default mux, served when no handler is set.
    pub mux: ServeMux,

    // long-lived
    /// TLS configuration.
    pub tls: Option<TlsConfig>,
    /// Connection state hook.
    pub conn_state: Option<ConnStateHook>,
    /// Sink for the primitive's internal errors.
    pub error_logger: Option<Arc<dyn ErrorLogger>>,
    /// Extensions copied into every request.
    pub base_extensions: Option<http::Extensions>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config: Config::defaults(),
            addr: String::new(),
            handler: None,
            name: String::new(),
            logger: None,
            middleware: Vec::new(),
            mux: ServeMux::new(),
            tls: None,
            conn_state: None,
            error_logger: None,
            base_extensions: None,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("config", &self.config)
            .field("addr", &self.addr)
            .field("name", &self.name)
            .field("handler", &self.handler.is_some())
            .field("logger", &self.logger.is_some())
            .field("middleware", &self.middleware.len())
            .field("mux", &self.mux)
            .field("tls", &self.tls)
            .finish_non_exhaustive()
    }
}

impl Settings {
    /// Applies `options` in order, collecting every failure.
    pub fn apply(&mut self, options: &[BoxOption]) -> Result<(), ServerError> {
        let errors: Vec<ServerError> = options
            .iter()
            .filter_map(|option| option.apply(self).err())
            .collect();

        match ServerError::from_options(errors) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// The TLS configuration, created with the default profile when absent.
    pub fn tls_mut(&mut self) -> &mut TlsConfig {
        self.tls.get_or_insert_with(TlsConfig::default_profile)
    }

    /// Reports whether TLS material is configured.
    pub fn use_tls(&self) -> bool {
        self.tls.as_ref().is_some_and(TlsConfig::has_certificates)
    }
}

impl ServerOption for Config {
    fn apply(&self, settings: &mut Settings) -> Result<(), ServerError> {
        settings.config = *self;
        Ok(())
    }
}

impl ServerOption for Port {
    fn apply(&self, settings: &mut Settings) -> Result<(), ServerError> {
        settings.addr = self.apply_to_addr(&settings.addr);
        Ok(())
    }
}

impl ServerOption for TlsFiles {
    /// Applies the files to the server's TLS configuration. Does nothing
    /// unless both a certificate and a key file are set.
    fn apply(&self, settings: &mut Settings) -> Result<(), ServerError> {
        if !self.has_key_pair() {
            return Ok(());
        }
        self.apply_tls(settings.tls_mut())?;
        Ok(())
    }
}

impl ServerOption for TlsConfig {
    fn apply(&self, settings: &mut Settings) -> Result<(), ServerError> {
        settings.tls = Some(self.clone());
        Ok(())
    }
}

/// Combines `options` into a single option.
pub fn with_options(options: Vec<BoxOption>) -> impl ServerOption {
    move |settings: &mut Settings| settings.apply(&options)
}

/// Sets the root handler.
pub fn with_handler(handler: impl Handler) -> impl ServerOption {
    let handler: SharedHandler = Arc::new(handler);
    move |settings: &mut Settings| -> Result<(), ServerError> {
        settings.handler = Some(Arc::clone(&handler));
        Ok(())
    }
}

/// The option returned by [`with_name`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerName(String);

impl ServerOption for ServerName {
    fn apply(&self, settings: &mut Settings) -> Result<(), ServerError> {
        settings.name.clone_from(&self.0);
        Ok(())
    }
}

/// The option returned by [`with_addr`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenAddr(String);

impl ServerOption for ListenAddr {
    fn apply(&self, settings: &mut Settings) -> Result<(), ServerError> {
        settings.addr.clone_from(&self.0);
        Ok(())
    }
}

/// Sets the server name.
pub fn with_name(name: impl Into<String>) -> ServerName {
    ServerName(name.into())
}

/// Sets the listen address.
pub fn with_addr(addr: impl Into<String>) -> ListenAddr {
    ListenAddr(addr.into())
}

/// Sets extensions copied into every request before it reaches the handler.
pub fn with_base_extensions(extensions: http::Extensions) -> impl ServerOption {
    move |settings: &mut Settings| -> Result<(), ServerError> {
        settings.base_extensions = Some(extensions.clone());
        Ok(())
    }
}

/// Sets the connection state hook.
pub fn with_conn_state<F>(hook: F) -> impl ServerOption
where
    F: Fn(SocketAddr, ConnState) + Send + Sync + 'static,
{
    let hook: ConnStateHook = Arc::new(hook);
    move |settings: &mut Settings| -> Result<(), ServerError> {
        settings.conn_state = Some(Arc::clone(&hook));
        Ok(())
    }
}

/// Sets the TLS configuration and applies `options` to it.
///
/// Returns the TLS error of the first failing option.
pub fn with_tls_config(config: TlsConfig, options: Vec<Box<dyn TlsOption>>) -> impl ServerOption {
    move |settings: &mut Settings| -> Result<(), ServerError> {
        let mut tls = config.clone();
        for option in &options {
            option.apply_tls(&mut tls)?;
        }
        settings.tls = Some(tls);
        Ok(())
    }
}

/// Installs an external on-demand certificate supplier, such as an ACME
/// client.
pub fn with_certificate_resolver(resolver: Arc<dyn ResolvesServerCert>) -> impl ServerOption {
    move |settings: &mut Settings| -> Result<(), ServerError> {
        settings
            .tls_mut()
            .set_certificate_resolver(Arc::clone(&resolver));
        Ok(())
    }
}

/// Sets the lifecycle logger.
pub fn with_logger(logger: Arc<dyn Logger>) -> impl ServerOption {
    move |settings: &mut Settings| -> Result<(), ServerError> {
        settings.logger = Some(Arc::clone(&logger));
        Ok(())
    }
}

/// Sets a [`DefaultLogger`] writing to `tracing`.
pub fn with_default_logger() -> impl ServerOption {
    with_logger(Arc::new(DefaultLogger::new()))
}

/// Sets the sink for the primitive's internal errors.
pub fn with_error_logger(logger: Arc<dyn ErrorLogger>) -> impl ServerOption {
    move |settings: &mut Settings| -> Result<(), ServerError> {
        settings.error_logger = Some(Arc::clone(&logger));
        Ok(())
    }
}

/// Registers routes on the server's default mux.
///
/// The default mux only serves requests when no handler is set. Invalid or
/// duplicate patterns fail the option with [`ServerError::Route`]; the valid
/// routes of the batch are still registered.
pub fn with_routes(registerer: impl RoutesRegisterer + 'static) -> impl ServerOption {
    move |settings: &mut Settings| -> Result<(), ServerError> {
        let Err(errors) = settings.mux.try_register(&registerer) else {
            return Ok(());
        };
        match ServerError::from_options(errors.into_iter().map(ServerError::Route).collect()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Appends middleware wrapped around the handler when the server starts.
pub fn with_middleware(middleware: impl Middleware) -> impl ServerOption {
    let middleware: SharedMiddleware = Arc::new(middleware);
    move |settings: &mut Settings| -> Result<(), ServerError> {
        settings.middleware.push(Arc::clone(&middleware));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tls::TlsError;
    use serv_core::NoContent;

    #[test]
    fn test_port_option() {
        let mut settings = Settings::default();
        settings.apply(&[Box::new(with_addr("localhost")), Box::new(Port::new(8080))]).unwrap();
        assert_eq!(settings.addr, "localhost:8080");
    }

    #[test]
    fn test_options_collect_all_errors() {
        let fail = |_: &mut Settings| -> Result<(), ServerError> { Err(ServerError::Closed) };
        let mut settings = Settings::default();
        let err = settings
            .apply(&[Box::new(fail), Box::new(with_name("api")), Box::new(fail)])
            .unwrap_err();

        assert!(matches!(err, ServerError::Options(ref errors) if errors.len() == 2));
        assert_eq!(settings.name, "api");
    }

    #[test]
    fn test_single_error_is_returned_unwrapped() {
        let fail = |_: &mut Settings| -> Result<(), ServerError> { Err(ServerError::Closed) };
        let mut settings = Settings::default();
        let err = settings.apply(&[Box::new(with_options(vec![Box::new(fail)]))]).unwrap_err();
        assert!(err.is_closed());
    }

    #[test]
    fn test_tls_files_without_key_pair_is_noop() {
        let mut settings = Settings::default();
        let files = TlsFiles {
            cert_file: Some("cert.pem".into()),
            ..TlsFiles::default()
        };
        settings.apply(&[Box::new(files)]).unwrap();
        assert!(settings.tls.is_none());
        assert!(!settings.use_tls());
    }

    #[test]
    fn test_tls_files_install_resolver() {
        let mut settings = Settings::default();
        let files = TlsFiles {
            cert_file: Some("cert.pem".into()),
            key_file: Some("key.pem".into()),
            ..TlsFiles::default()
        };
        settings.apply(&[Box::new(files)]).unwrap();
        assert!(settings.use_tls());
        assert!(settings.tls.as_ref().unwrap().certificate_resolver().is_some());
    }

    #[test]
    fn test_tls_files_with_missing_ca_fails() {
        let mut settings = Settings::default();
        let files = TlsFiles {
            ca_cert_file: Some("/nonexistent/ca.pem".into()),
            cert_file: Some("cert.pem".into()),
            key_file: Some("key.pem".into()),
            ..TlsFiles::default()
        };
        let err = settings.apply(&[Box::new(files)]).unwrap_err();
        assert!(matches!(err, ServerError::Tls(TlsError::Io { .. })));
    }

    #[test]
    fn test_handler_and_middleware_options() {
        let mut settings = Settings::default();
        settings
            .apply(&[
                Box::new(with_handler(NoContent)),
                Box::new(with_default_logger()),
                Box::new(Config::default()),
            ])
            .unwrap();

        assert!(settings.handler.is_some());
        assert!(settings.logger.is_some());
        assert!(settings.config.is_zero());
    }

    #[test]
    fn test_name_and_addr_from_borrowed_str() {
        let name = String::from("api");
        let addr = format!("127.0.0.1:{}", 9000);
        let options: Vec<BoxOption> = vec![Box::new(with_name(name.as_str())), Box::new(with_addr(&*addr))];
        drop((name, addr));

        let mut settings = Settings::default();
        settings.apply(&options).unwrap();
        assert_eq!(settings.name, "api");
        assert_eq!(settings.addr, "127.0.0.1:9000");
    }

    #[test]
    fn test_routes_option_reports_bad_patterns() {
        use crate::router::{Route, RouteError, RouteHandler};

        let routes = |router: &mut dyn RouteHandler| {
            router.handle_route(Route::new("/ok", NoContent));
            router.handle_route(Route::new("/ok", NoContent));
            router.handle_route(Route::new("no-slash", NoContent));
        };
        let mut settings = Settings::default();
        let err = settings.apply(&[Box::new(with_routes(routes))]).unwrap_err();

        let ServerError::Options(errors) = err else {
            panic!("expected both route errors, got {err:?}");
        };
        assert!(matches!(errors[0], ServerError::Route(RouteError::Conflict(ref key)) if key == "/ok"));
        assert!(matches!(errors[1], ServerError::Route(RouteError::InvalidPattern { .. })));
        assert_eq!(settings.mux.len(), 1);
    }

    #[test]
    fn test_routes_option_single_failure_is_route_error() {
        use crate::router::{Route, RouteHandler};

        let routes = |router: &mut dyn RouteHandler| {
            router.handle_route(Route::new("/{}", NoContent));
        };
        let mut settings = Settings::default();
        let err = settings.apply(&[Box::new(with_routes(routes))]).unwrap_err();
        assert!(matches!(err, ServerError::Route(_)));
    }
}
