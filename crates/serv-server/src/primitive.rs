//! The HTTP primitive driven by [`Server`](crate::Server).
//!
//! One [`HttpServer`] is built each time a server starts. It owns the accept
//! loop, the per-run shutdown signals and the connection tracker, so nothing
//! from a previous run leaks into the next one.

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use parking_lot::Mutex;
use serv_core::{Request, RequestMeta, Response, ResponseExt, SharedHandler};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

use crate::config::{Limits, MIN_MAX_HEADER_BYTES};
use crate::error::ServerError;
use crate::logger::ErrorLogger;
use crate::options::{ConnState, ConnStateHook};
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// The parts of a server that survive a restart.
#[derive(Clone)]
pub(crate) struct Primitive {
    pub handler: SharedHandler,
    pub limits: Limits,
    pub conn_state: Option<ConnStateHook>,
    pub error_logger: Arc<dyn ErrorLogger>,
    pub base_extensions: Option<http::Extensions>,
}

/// A single run of the accept loop and its connections.
pub(crate) struct HttpServer {
    primitive: Primitive,
    shutdown: ShutdownSignal,
    force: ShutdownSignal,
    stopped: ShutdownSignal,
    tracker: ConnectionTracker,
    keep_alives: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl HttpServer {
    pub fn new(primitive: Primitive) -> Self {
        Self {
            primitive,
            shutdown: ShutdownSignal::new(),
            force: ShutdownSignal::new(),
            stopped: ShutdownSignal::new(),
            tracker: ConnectionTracker::new(),
            keep_alives: AtomicBool::new(true),
            local_addr: Mutex::new(None),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub fn set_keep_alives_enabled(&self, enabled: bool) {
        self.keep_alives.store(enabled, Ordering::SeqCst);
    }

    /// Completes once the accept loop has exited and released its listener,
    /// or the run ended without reaching it.
    pub async fn stopped(&self) {
        self.stopped.triggered().await;
    }

    /// Marks the run as holding no listener.
    pub fn mark_stopped(&self) {
        self.stopped.trigger();
    }

    /// Accepts connections until shutdown or close. Always returns an error;
    /// [`ServerError::Closed`] means the loop was stopped on purpose.
    pub async fn serve(
        self: &Arc<Self>,
        listener: TcpListener,
        tls: Option<TlsAcceptor>,
    ) -> Result<(), ServerError> {
        // fires after the loop has dropped `listener`, also when this future
        // is dropped
        let _stopped = TriggerOnDrop(&self.stopped);
        self.accept_loop(listener, tls).await
    }

    async fn accept_loop(
        self: &Arc<Self>,
        listener: TcpListener,
        tls: Option<TlsAcceptor>,
    ) -> Result<(), ServerError> {
        *self.local_addr.lock() = listener.local_addr().ok();
        let mut backoff = Duration::ZERO;

        loop {
            if self.shutdown.is_triggered() {
                return Err(ServerError::Closed);
            }

            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote_addr)) => {
                        backoff = Duration::ZERO;
                        self.spawn_connection(stream, remote_addr, tls.clone());
                    }
                    Err(err) if is_transient(&err) => {
                        backoff = (backoff * 2).clamp(Duration::from_millis(5), MAX_ACCEPT_BACKOFF);
                        self.primitive.error_logger.log_error("accept", &err);
                        tokio::time::sleep(backoff).await;
                    }
                    Err(err) => return Err(ServerError::Accept(err)),
                },
                () = self.shutdown.triggered() => {
                    tracing::debug!(
                        target: "serv::server",
                        active = self.tracker.active_connections(),
                        "accept loop stopped"
                    );
                    return Err(ServerError::Closed);
                }
            }
        }
    }

    /// Stops accepting, then waits for the listener to be released and open
    /// connections to finish. When `deadline` passes first the remaining
    /// connections are dropped.
    pub async fn shutdown(&self, deadline: Option<Duration>) -> Result<(), ServerError> {
        self.shutdown.trigger();
        let drained = async {
            self.stopped().await;
            self.tracker.wait_idle().await;
        };
        match deadline {
            None => {
                drained.await;
                Ok(())
            }
            Some(deadline) => tokio::time::timeout(deadline, drained)
                .await
                .map_err(|_| {
                    tracing::warn!(
                        target: "serv::server",
                        active = self.tracker.active_connections(),
                        "shutdown deadline exceeded, closing remaining connections"
                    );
                    self.force.trigger();
                    ServerError::DeadlineExceeded
                }),
        }
    }

    /// Stops accepting and drops every open connection.
    pub fn close(&self) {
        self.shutdown.trigger();
        self.force.trigger();
    }

    fn spawn_connection(self: &Arc<Self>, stream: TcpStream, remote_addr: SocketAddr, tls: Option<TlsAcceptor>) {
        let token = self.tracker.acquire();
        let this = Arc::clone(self);

        tokio::spawn(async move {
            this.report(remote_addr, ConnState::New);
            match tls {
                None => this.serve_connection(stream, remote_addr, false).await,
                Some(acceptor) => match this.handshake(&acceptor, stream).await {
                    Ok(stream) => this.serve_connection(stream, remote_addr, true).await,
                    Err(err) => this.primitive.error_logger.log_error("tls handshake", &err),
                },
            }
            this.report(remote_addr, ConnState::Closed);
            drop(token);
        });
    }

    async fn handshake(
        &self,
        acceptor: &TlsAcceptor,
        stream: TcpStream,
    ) -> io::Result<tokio_rustls::server::TlsStream<TcpStream>> {
        let timeout = self.primitive.limits.read_header_timeout;
        if timeout.is_zero() {
            return acceptor.accept(stream).await;
        }
        tokio::time::timeout(timeout, acceptor.accept(stream))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "tls handshake timed out"))?
    }

    async fn serve_connection<S>(self: &Arc<Self>, stream: S, remote_addr: SocketAddr, secure: bool)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let limits = self.primitive.limits;
        let idle = Arc::new(IdleTimer::new(limits.idle_timeout));

        let mut builder = http1::Builder::new();
        builder
            .timer(TokioTimer::new())
            .keep_alive(self.keep_alives.load(Ordering::SeqCst));
        if !limits.read_header_timeout.is_zero() {
            builder.header_read_timeout(limits.read_header_timeout);
        }
        if limits.max_header_bytes > 0 {
            builder.max_buf_size(limits.max_header_bytes.max(MIN_MAX_HEADER_BYTES));
        }

        let service = {
            let this = Arc::clone(self);
            let idle = Arc::clone(&idle);
            service_fn(move |request: hyper::Request<Incoming>| {
                let this = Arc::clone(&this);
                let idle = Arc::clone(&idle);
                async move {
                    let conn = ConnInfo { remote_addr, secure };
                    Ok::<_, Infallible>(this.handle(request, conn, &idle).await)
                }
            })
        };

        let conn = builder.serve_connection(TokioIo::new(stream), service);
        tokio::pin!(conn);
        let mut draining = false;

        loop {
            tokio::select! {
                result = conn.as_mut() => {
                    if let Err(err) = result {
                        if !err.is_incomplete_message() {
                            self.primitive.error_logger.log_error("serve connection", &err);
                        }
                    }
                    break;
                }
                () = self.force.triggered() => break,
                () = self.shutdown.triggered(), if !draining => {
                    draining = true;
                    conn.as_mut().graceful_shutdown();
                }
                () = idle.expired(), if !draining => {
                    tracing::trace!(target: "serv::server", %remote_addr, "closing idle connection");
                    draining = true;
                    conn.as_mut().graceful_shutdown();
                }
            }
        }
    }

    async fn handle(&self, request: hyper::Request<Incoming>, conn: ConnInfo, idle: &IdleTimer) -> Response {
        idle.begin();
        self.report(conn.remote_addr, ConnState::Active);

        let mut response = self.dispatch(request, conn).await;
        if !self.keep_alives.load(Ordering::SeqCst) {
            response
                .headers_mut()
                .insert(header::CONNECTION, HeaderValue::from_static("close"));
        }

        idle.end();
        self.report(conn.remote_addr, ConnState::Idle);
        response
    }

    async fn dispatch(&self, request: hyper::Request<Incoming>, conn: ConnInfo) -> Response {
        let limits = &self.primitive.limits;
        let (parts, body) = request.into_parts();

        let collected = if limits.read_timeout.is_zero() {
            Ok(body.collect().await)
        } else {
            tokio::time::timeout(limits.read_timeout, body.collect()).await
        };
        let body = match collected {
            Ok(Ok(collected)) => collected.to_bytes(),
            Ok(Err(err)) => {
                self.primitive.error_logger.log_error("read request body", &err);
                return Response::text(StatusCode::BAD_REQUEST, "bad request\n");
            }
            Err(_) => return Response::text(StatusCode::REQUEST_TIMEOUT, "request timeout\n"),
        };

        let mut request: Request = http::Request::from_parts(parts, Full::<Bytes>::new(body));
        if let Some(base) = &self.primitive.base_extensions {
            request.extensions_mut().extend(base.clone());
        }
        request
            .extensions_mut()
            .insert(RequestMeta::new(Some(conn.remote_addr), conn.secure));

        let response = self.primitive.handler.call(request);
        if limits.write_timeout.is_zero() {
            return response.await;
        }
        match tokio::time::timeout(limits.write_timeout, response).await {
            Ok(response) => response,
            Err(_) => Response::text(StatusCode::SERVICE_UNAVAILABLE, "service unavailable\n"),
        }
    }

    fn report(&self, remote_addr: SocketAddr, state: ConnState) {
        if let Some(hook) = &self.primitive.conn_state {
            hook(remote_addr, state);
        }
    }
}

struct TriggerOnDrop<'a>(&'a ShutdownSignal);

impl Drop for TriggerOnDrop<'_> {
    fn drop(&mut self) {
        self.0.trigger();
    }
}

#[derive(Debug, Clone, Copy)]
struct ConnInfo {
    remote_addr: SocketAddr,
    secure: bool,
}

/// Tracks how long a kept-alive connection has been without a request.
struct IdleTimer {
    timeout: Duration,
    in_flight: AtomicUsize,
    since: Mutex<Instant>,
}

impl IdleTimer {
    fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            in_flight: AtomicUsize::new(0),
            since: Mutex::new(Instant::now()),
        }
    }

    fn begin(&self) {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
    }

    fn end(&self) {
        *self.since.lock() = Instant::now();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    /// Completes once the connection has been idle for the timeout. Never
    /// completes when the timeout is zero.
    async fn expired(&self) {
        if self.timeout.is_zero() {
            std::future::pending::<()>().await;
        }
        loop {
            let wait = if self.in_flight.load(Ordering::SeqCst) > 0 {
                self.timeout
            } else {
                let idle_for = self.since.lock().elapsed();
                match self.timeout.checked_sub(idle_for) {
                    Some(remaining) if !remaining.is_zero() => remaining,
                    _ => return,
                }
            };
            tokio::time::sleep(wait).await;
        }
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    ) || matches!(err.raw_os_error(), Some(23 | 24))
}
