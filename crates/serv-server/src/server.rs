//! The lifecycle-managed server.
//!
//! A [`Server`] wraps the HTTP primitive with a state machine that makes
//! start, shutdown, close and restart safe to call from any task. All mutable
//! state lives behind one `RwLock`; the lock is never held while serving or
//! while waiting for connections to drain.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use serv_core::NoContent;
//! use serv_server::{Port, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), serv_server::ServerError> {
//!     let server = Arc::new(
//!         Server::builder()
//!             .name("api")
//!             .port(Port::new(8080))
//!             .handler(NoContent)
//!             .build()?,
//!     );
//!
//!     let running = Arc::clone(&server);
//!     let task = tokio::spawn(async move { running.run().await });
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     if let Err(err) = server.shutdown(Some(Duration::from_secs(3))).await {
//!         eprintln!("shutdown: {err}");
//!     }
//!     task.await.ok();
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serv_core::{wrap, BoxFuture, Handler, Middleware, Request, RequestMeta, Response, SharedHandler};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

use crate::config::{Config, Limits};
use crate::error::ServerError;
use crate::primitive::{HttpServer, Primitive};
use crate::logger::{ErrorLogger, Logger, NopLogger, TracingErrorLogger};
use crate::options::{
    with_handler, with_logger, with_middleware, with_name, with_routes, BoxOption, ServerOption,
    Settings,
};
use crate::port::{join_host_port, split_host_port, Port};
use crate::router::RoutesRegisterer;
use crate::state::{InvalidStateError, State, StateReason};
use crate::tls::{CertificateLoader, TlsConfig, TlsKeyPair};

const HTTP_ALPN: &[u8] = b"http/1.1";

/// A lifecycle-managed HTTP server.
///
/// See the [module documentation](self) for an example.
pub struct Server {
    inner: RwLock<Inner>,
}

struct Inner {
    settings: Settings,
    state: State,
    running: Option<Arc<HttpServer>>,
}

// How a run was started.
enum Mode<'a> {
    Plain,
    Tls { cert_file: &'a Path, key_file: &'a Path },
}

struct Run {
    http: Arc<HttpServer>,
    addr: String,
    acceptor: Option<TlsAcceptor>,
    previous: Option<Arc<HttpServer>>,
}

impl Run {
    // A closed run may still hold its listener until its accept loop is
    // polled again; binding before that can fail with `AddrInUse`.
    async fn previous_stopped(&self) {
        if let Some(previous) = &self.previous {
            previous.stopped().await;
        }
    }
}

// Covers runs that end before the accept loop starts, such as a failed bind.
impl Drop for Run {
    fn drop(&mut self) {
        self.http.mark_stopped();
    }
}

impl Default for Server {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Server")
            .field("name", &inner.settings.name)
            .field("addr", &inner.settings.addr)
            .field("state", &inner.state)
            .finish_non_exhaustive()
    }
}

impl Server {
    /// Creates an unstarted server with the default config.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                settings: Settings::default(),
                state: State::Unstarted,
                running: None,
            }),
        }
    }

    /// Creates a server and applies `options`.
    pub fn with_options(options: Vec<BoxOption>) -> Result<Self, ServerError> {
        let server = Self::new();
        server.with(options)?;
        Ok(server)
    }

    /// Returns a builder collecting options.
    pub fn builder() -> ServerBuilder {
        ServerBuilder::default()
    }

    /// Applies additional options.
    ///
    /// Fails with [`StateReason::AlreadyStarted`] while the server is
    /// started. Every option is applied; failures are returned together.
    pub fn with(&self, options: Vec<BoxOption>) -> Result<(), ServerError> {
        let mut inner = self.inner.write();
        if inner.state == State::Started {
            return Err(InvalidStateError::new(StateReason::AlreadyStarted, inner.state).into());
        }
        inner.settings.apply(&options)
    }

    /// The server name; empty when none was set.
    pub fn name(&self) -> String {
        self.inner.read().settings.name.clone()
    }

    /// The current lifecycle state.
    pub fn state(&self) -> State {
        self.inner.read().state
    }

    /// The address the current run is listening on.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .read()
            .running
            .as_ref()
            .and_then(|http| http.local_addr())
    }

    /// Serves plain HTTP connections accepted from `listener`.
    ///
    /// Blocks until the server stops. A stop caused by
    /// [`shutdown`](Self::shutdown) or [`close`](Self::close) is reported as
    /// [`ServerError::Closed`].
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let run = self.start(&Mode::Plain)?;
        run.previous_stopped().await;
        let result = run.http.serve(listener, None).await;
        self.finish(&run.http, result)
    }

    /// Binds the configured address and serves plain HTTP.
    pub async fn listen_and_serve(&self) -> Result<(), ServerError> {
        let run = self.start(&Mode::Plain)?;
        run.previous_stopped().await;
        let result = match bind(&run.addr, false).await {
            Ok(listener) => run.http.serve(listener, None).await,
            Err(err) => Err(err),
        };
        self.finish(&run.http, result)
    }

    /// Serves TLS connections accepted from `listener`.
    ///
    /// Non-empty `cert_file` and `key_file` are added to the configured TLS
    /// material; pass empty paths to use only what options configured.
    pub async fn serve_tls(
        &self,
        listener: TcpListener,
        cert_file: impl AsRef<Path>,
        key_file: impl AsRef<Path>,
    ) -> Result<(), ServerError> {
        let mode = Mode::Tls {
            cert_file: cert_file.as_ref(),
            key_file: key_file.as_ref(),
        };
        let run = self.start(&mode)?;
        run.previous_stopped().await;
        let result = run.http.serve(listener, run.acceptor.clone()).await;
        self.finish(&run.http, result)
    }

    /// Binds the configured address and serves TLS.
    pub async fn listen_and_serve_tls(
        &self,
        cert_file: impl AsRef<Path>,
        key_file: impl AsRef<Path>,
    ) -> Result<(), ServerError> {
        let mode = Mode::Tls {
            cert_file: cert_file.as_ref(),
            key_file: key_file.as_ref(),
        };
        let run = self.start(&mode)?;
        run.previous_stopped().await;
        let result = match bind(&run.addr, true).await {
            Ok(listener) => run.http.serve(listener, run.acceptor.clone()).await,
            Err(err) => Err(err),
        };
        self.finish(&run.http, result)
    }

    /// Listens on the configured address, with TLS when TLS material is
    /// configured, until the server stops.
    ///
    /// Unlike the `serve` variants a regular stop returns `Ok(())`.
    pub async fn run(&self) -> Result<(), ServerError> {
        let use_tls = self.inner.read().settings.use_tls();
        let result = if use_tls {
            self.listen_and_serve_tls("", "").await
        } else {
            self.listen_and_serve().await
        };

        match result {
            Err(err) if err.is_closed() => Ok(()),
            other => other,
        }
    }

    /// Gracefully shuts the server down.
    ///
    /// Stops accepting connections, closes idle ones, and waits for the
    /// listener to be released and active requests to complete. The wait is bounded by the shorter of `timeout`
    /// and the configured shutdown timeout. Running out of time drops the
    /// remaining connections, as [`close`](Self::close) would, and returns
    /// [`ServerError::DeadlineExceeded`]. The server is closed afterwards in
    /// every case.
    pub async fn shutdown(&self, timeout: Option<Duration>) -> Result<(), ServerError> {
        let (http, deadline, logger, name) = {
            let mut inner = self.inner.write();
            let http = match (&inner.state, &inner.running) {
                (State::Started, Some(http)) => Arc::clone(http),
                _ => {
                    return Err(
                        InvalidStateError::new(StateReason::UnableToShutdown, inner.state).into(),
                    )
                }
            };

            inner.state = State::Closing;
            http.set_keep_alives_enabled(false);
            let deadline = shutdown_deadline(timeout, inner.settings.config.shutdown_timeout);
            (http, deadline, self.logger(&inner), inner.settings.name.clone())
        };
        logger.log_server_shutdown(&name);

        let _closed = MarkClosed {
            server: self,
            http: &http,
        };
        http.shutdown(deadline).await
    }

    /// Immediately closes the listener and every open connection.
    ///
    /// The listener is released once the accept loop observes the close; a
    /// following start waits for that before binding.
    pub fn close(&self) -> Result<(), ServerError> {
        let (logger, name) = {
            let mut inner = self.inner.write();
            let http = match (&inner.state, &inner.running) {
                (State::Started, Some(http)) => Arc::clone(http),
                _ => {
                    return Err(
                        InvalidStateError::new(StateReason::UnableToClose, inner.state).into(),
                    )
                }
            };

            http.close();
            inner.state = State::Closed;
            (self.logger(&inner), inner.settings.name.clone())
        };
        logger.log_server_close(&name);
        Ok(())
    }

    fn logger(&self, inner: &Inner) -> Arc<dyn Logger> {
        inner
            .settings
            .logger
            .clone()
            .unwrap_or_else(|| Arc::new(NopLogger))
    }

    fn start(&self, mode: &Mode<'_>) -> Result<Run, ServerError> {
        let mut inner = self.inner.write();
        if matches!(inner.state, State::Started | State::Closing) {
            return Err(InvalidStateError::new(StateReason::UnableToStart, inner.state).into());
        }

        let acceptor = match mode {
            Mode::Plain => None,
            Mode::Tls { cert_file, key_file } => {
                Some(tls_acceptor(&inner.settings, cert_file, key_file)?)
            }
        };

        let settings = &mut inner.settings;
        let logger = Arc::clone(settings.logger.get_or_insert_with(|| Arc::new(NopLogger)));
        if settings.config.is_zero() {
            settings.config = Config::defaults();
        }
        let mut limits = Limits::default();
        settings.config.apply_to(&mut limits);

        let handler = settings
            .handler
            .clone()
            .unwrap_or_else(|| Arc::new(settings.mux.clone()));
        let handler = wrap(handler, settings.middleware.clone());
        let handler = with_server_name(&settings.name, handler);

        let primitive = Primitive {
            handler,
            limits,
            conn_state: settings.conn_state.clone(),
            error_logger: error_logger(settings.error_logger.as_ref(), logger.as_ref()),
            base_extensions: settings.base_extensions.clone(),
        };
        let http = Arc::new(HttpServer::new(primitive));
        let addr = settings.addr.clone();
        let name = settings.name.clone();

        let previous = inner.running.replace(Arc::clone(&http));
        inner.state = State::Started;
        drop(inner);

        match mode {
            Mode::Plain => logger.log_server_start(&name, &addr),
            Mode::Tls { cert_file, key_file } => logger.log_server_start_tls(
                &name,
                &addr,
                &cert_file.display().to_string(),
                &key_file.display().to_string(),
            ),
        }

        Ok(Run {
            http,
            addr,
            acceptor,
            previous,
        })
    }

    // Records how a run ended. Runs replaced by a restart leave the state
    // alone.
    fn finish(&self, http: &Arc<HttpServer>, result: Result<(), ServerError>) -> Result<(), ServerError> {
        let err = result.err().unwrap_or(ServerError::Closed);

        let mut inner = self.inner.write();
        let current = inner
            .running
            .as_ref()
            .is_some_and(|running| Arc::ptr_eq(running, http));
        if current {
            match inner.state {
                // shutdown marks the server closed once connections drained
                State::Closing => {}
                State::Started if !err.is_closed() => {
                    tracing::error!(target: "serv::server", error = %err, "server stopped with an error");
                    inner.state = State::Errored;
                }
                _ => inner.state = State::Closed,
            }
        }
        Err(err)
    }
}

struct MarkClosed<'a> {
    server: &'a Server,
    http: &'a Arc<HttpServer>,
}

impl Drop for MarkClosed<'_> {
    fn drop(&mut self) {
        let mut inner = self.server.inner.write();
        let current = inner
            .running
            .as_ref()
            .is_some_and(|running| Arc::ptr_eq(running, self.http));
        if current && inner.state == State::Closing {
            inner.state = State::Closed;
        }
    }
}

/// Attaches the server name to each request's [`RequestMeta`].
struct NamedHandler {
    name: Arc<str>,
    next: SharedHandler,
}

impl Handler for NamedHandler {
    fn call(&self, mut request: Request) -> BoxFuture<'static, Response> {
        RequestMeta::ensure(&mut request).set_server_name(&self.name);
        self.next.call(request)
    }
}

/// Wraps `handler` so the server `name` is available to every request
/// through [`RequestMeta::server_name`]. An empty name returns `handler`
/// unchanged.
pub fn with_server_name(name: &str, handler: SharedHandler) -> SharedHandler {
    if name.is_empty() {
        return handler;
    }
    Arc::new(NamedHandler {
        name: Arc::from(name),
        next: handler,
    })
}

fn shutdown_deadline(timeout: Option<Duration>, configured: Duration) -> Option<Duration> {
    match (timeout, configured.is_zero()) {
        (None, true) => None,
        (None, false) => Some(configured),
        (Some(timeout), true) => Some(timeout),
        (Some(timeout), false) => Some(timeout.min(configured)),
    }
}

fn error_logger(explicit: Option<&Arc<dyn ErrorLogger>>, logger: &dyn Logger) -> Arc<dyn ErrorLogger> {
    if let Some(explicit) = explicit {
        return Arc::clone(explicit);
    }
    match logger.as_error_logger_provider() {
        Some(provider) => provider.error_logger(),
        None => Arc::new(TracingErrorLogger),
    }
}

fn tls_acceptor(settings: &Settings, cert_file: &Path, key_file: &Path) -> Result<TlsAcceptor, ServerError> {
    let mut tls = settings.tls.clone().unwrap_or_else(TlsConfig::default_profile);
    // explicitly passed files are loaded now so bad paths fail the start
    if let Some(certificate) = TlsKeyPair::new(cert_file, key_file).load_certificate()? {
        tls.add_certificate(certificate);
    }
    if tls.alpn_protocols.is_empty() {
        tls.alpn_protocols.push(HTTP_ALPN.to_vec());
    }
    let config = tls.build_server_config()?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

// Resolves listen addresses the way `host:port` strings are usually read:
// a missing host means all interfaces, a missing port the scheme default.
fn listen_addr(addr: &str, tls: bool) -> String {
    let default_port = Port::new(if tls { 443 } else { 80 });
    if addr.is_empty() {
        return join_host_port("0.0.0.0", default_port);
    }
    match split_host_port(addr) {
        Ok((host, port)) if host.is_empty() => join_host_port("0.0.0.0", port),
        Ok(_) => addr.to_string(),
        Err(err) if err.is_missing_port() => join_host_port(addr, default_port),
        Err(_) => addr.to_string(),
    }
}

async fn bind(addr: &str, tls: bool) -> Result<TcpListener, ServerError> {
    let resolved = listen_addr(addr, tls);
    TcpListener::bind(&resolved)
        .await
        .map_err(|source| ServerError::Bind {
            addr: resolved,
            source,
        })
}

/// Collects options for a new [`Server`].
#[derive(Default)]
pub struct ServerBuilder {
    options: Vec<BoxOption>,
}

impl fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("options", &self.options.len())
            .finish()
    }
}

impl ServerBuilder {
    /// Adds an option.
    #[must_use]
    pub fn option(mut self, option: impl ServerOption + 'static) -> Self {
        self.options.push(Box::new(option));
        self
    }

    /// Sets the server name.
    #[must_use]
    pub fn name(self, name: impl Into<String>) -> Self {
        self.option(with_name(name.into()))
    }

    /// Sets the root handler.
    #[must_use]
    pub fn handler(self, handler: impl Handler) -> Self {
        self.option(with_handler(handler))
    }

    /// Applies a port to the listen address.
    #[must_use]
    pub fn port(self, port: Port) -> Self {
        self.option(port)
    }

    /// Sets timeouts and limits.
    #[must_use]
    pub fn config(self, config: Config) -> Self {
        self.option(config)
    }

    /// Sets the lifecycle logger.
    #[must_use]
    pub fn logger(self, logger: Arc<dyn Logger>) -> Self {
        self.option(with_logger(logger))
    }

    /// Appends middleware.
    #[must_use]
    pub fn middleware(self, middleware: impl Middleware) -> Self {
        self.option(with_middleware(middleware))
    }

    /// Registers routes on the default mux.
    #[must_use]
    pub fn routes(self, registerer: impl RoutesRegisterer + 'static) -> Self {
        self.option(with_routes(registerer))
    }

    /// Builds the server, failing with every option error combined.
    pub fn build(self) -> Result<Server, ServerError> {
        Server::with_options(self.options)
    }
}
