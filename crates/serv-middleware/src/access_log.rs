//! Access logging middleware.
//!
//! [`AccessLog`] measures every request passing through it and hands the
//! collected [`Details`] and [`RequestInfo`] to an [`AccessLogger`]. Two text
//! formats are included:
//!
//! | Format            | Line                                                        |
//! |-------------------|-------------------------------------------------------------|
//! | [`GenericFormat`] | `remote handler "METHOD uri proto" status sizeb`           |
//! | [`ClfFormat`]     | `remote - user [02/Jan/2006:15:04:05 -0700] "METHOD uri proto" status size` |
//!
//! Requests marked with [`set_should_ignore`] (or served through an
//! [`IgnoreHandler`]) are not logged.
//!
//! ## Example
//!
//! ```
//! use serv_middleware::access_log::{AccessLog, ClfFormat};
//! use serv_middleware::{LimitCodes, ResponseStatus};
//!
//! let errors_only = AccessLog::new(LimitCodes::new(ResponseStatus::ERRORS, ClfFormat::new()));
//! # let _ = errors_only;
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, FixedOffset, Local};
use http::{header, Method, StatusCode, Version};
use serv_core::{
    body_len, BoxFuture, Handler, LineWriter, Middleware, Next, Request, RequestMeta, Response,
    TracingWriter,
};

use crate::status::LimitCodes;

/// Timestamp layout of the common log format.
pub const CLF_TIME_LAYOUT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// Measurements of a single request and its response.
#[derive(Debug, Clone)]
pub struct Details {
    /// Name of the server that received the request.
    pub server_name: String,
    /// Name of the route that handled the request.
    pub handler_name: String,
    /// The `User-Agent` request header.
    pub user_agent: String,
    /// Status code of the response.
    pub status: StatusCode,
    /// When the request was received.
    pub start_time: DateTime<FixedOffset>,
    /// How long the handler took.
    pub duration: Duration,
    /// Size of the response body.
    pub bytes_written: u64,
    /// Requests in flight through the same middleware, this one included.
    pub request_count: usize,
}

/// The parts of a request an access log line needs.
///
/// The request itself is consumed by the handler, so these are captured
/// before it runs.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// Address of the peer.
    pub remote_addr: Option<SocketAddr>,
    /// Request method.
    pub method: Method,
    /// The request target as received.
    pub uri: String,
    /// Protocol version.
    pub version: Version,
    /// User from the URI's userinfo or a Basic `Authorization` header.
    pub username: Option<String>,
}

impl RequestInfo {
    /// Captures the loggable parts of `request`.
    pub fn from_request(request: &Request) -> Self {
        Self {
            remote_addr: RequestMeta::of(request).and_then(RequestMeta::remote_addr),
            method: request.method().clone(),
            uri: request.uri().to_string(),
            version: request.version(),
            username: username(request),
        }
    }

    /// The peer's IP address without the port, or `-` when unknown.
    pub fn remote_host(&self) -> String {
        self.remote_addr
            .map_or_else(|| "-".to_string(), |addr| addr.ip().to_string())
    }

    /// The protocol as written in a request line, e.g. `HTTP/1.1`.
    pub fn proto(&self) -> &'static str {
        proto(self.version)
    }
}

fn proto(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

fn username(request: &Request) -> Option<String> {
    let from_uri = request
        .uri()
        .authority()
        .and_then(|authority| authority.as_str().rsplit_once('@'))
        .map(|(userinfo, _)| userinfo.split(':').next().unwrap_or_default().to_string());
    if let Some(user) = from_uri.filter(|user| !user.is_empty()) {
        return Some(user);
    }

    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, credentials) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(credentials.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, _) = decoded.split_once(':')?;
    (!user.is_empty()).then(|| user.to_string())
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

/// Receives the details of every completed request.
pub trait AccessLogger: Send + Sync + 'static {
    /// Logs one request.
    fn log(&self, details: &Details, request: &RequestInfo);
}

impl<L: AccessLogger + ?Sized> AccessLogger for Arc<L> {
    fn log(&self, details: &Details, request: &RequestInfo) {
        (**self).log(details, request);
    }
}

impl<L: AccessLogger> AccessLogger for LimitCodes<L> {
    fn log(&self, details: &Details, request: &RequestInfo) {
        if self.allows(details.status) {
            self.inner().log(details, request);
        }
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopAccessLogger;

impl AccessLogger for NopAccessLogger {
    fn log(&self, _details: &Details, _request: &RequestInfo) {}
}

/// Writes `remote handler "METHOD uri proto" status sizeb` lines.
pub struct GenericFormat {
    out: Arc<dyn LineWriter>,
}

impl GenericFormat {
    /// Writes to the `serv::access` tracing target.
    pub fn new() -> Self {
        Self::with_writer(Arc::new(TracingWriter::access()))
    }

    /// Writes to `out`.
    pub fn with_writer(out: Arc<dyn LineWriter>) -> Self {
        Self { out }
    }

    /// Formats a single line.
    pub fn line(details: &Details, request: &RequestInfo) -> String {
        format!(
            "{} {} \"{} {} {}\" {} {}b",
            request.remote_host(),
            or_dash(&details.handler_name),
            request.method,
            request.uri,
            request.proto(),
            details.status.as_u16(),
            details.bytes_written,
        )
    }
}

impl Default for GenericFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessLogger for GenericFormat {
    fn log(&self, details: &Details, request: &RequestInfo) {
        self.out.write_line(&Self::line(details, request));
    }
}

/// Writes lines in the Apache common log format.
pub struct ClfFormat {
    out: Arc<dyn LineWriter>,
}

impl ClfFormat {
    /// Writes to the `serv::access` tracing target.
    pub fn new() -> Self {
        Self::with_writer(Arc::new(TracingWriter::access()))
    }

    /// Writes to `out`.
    pub fn with_writer(out: Arc<dyn LineWriter>) -> Self {
        Self { out }
    }

    /// Formats a single line.
    pub fn line(details: &Details, request: &RequestInfo) -> String {
        format!(
            "{} - {} [{}] \"{} {} {}\" {} {}",
            request.remote_host(),
            or_dash(request.username.as_deref().unwrap_or_default()),
            details.start_time.format(CLF_TIME_LAYOUT),
            request.method,
            request.uri,
            request.proto(),
            details.status.as_u16(),
            details.bytes_written,
        )
    }
}

impl Default for ClfFormat {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessLogger for ClfFormat {
    fn log(&self, details: &Details, request: &RequestInfo) {
        self.out.write_line(&Self::line(details, request));
    }
}

/// Middleware that reports every request to an [`AccessLogger`].
pub struct AccessLog {
    logger: Arc<dyn AccessLogger>,
    traffic: AtomicUsize,
}

impl AccessLog {
    /// Reports to `logger`.
    pub fn new(logger: impl AccessLogger) -> Self {
        Self::shared(Arc::new(logger))
    }

    /// Reports to an already shared `logger`.
    pub fn shared(logger: Arc<dyn AccessLogger>) -> Self {
        Self {
            logger,
            traffic: AtomicUsize::new(0),
        }
    }

    /// Requests currently in flight.
    pub fn active_requests(&self) -> usize {
        self.traffic.load(Ordering::Acquire)
    }
}

impl Default for AccessLog {
    fn default() -> Self {
        Self::new(GenericFormat::new())
    }
}

impl std::fmt::Debug for AccessLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessLog")
            .field("active_requests", &self.active_requests())
            .finish_non_exhaustive()
    }
}

struct Traffic<'a>(&'a AtomicUsize);

impl<'a> Traffic<'a> {
    fn enter(counter: &'a AtomicUsize) -> (Self, usize) {
        let count = counter.fetch_add(1, Ordering::AcqRel) + 1;
        (Self(counter), count)
    }
}

impl Drop for Traffic<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Middleware for AccessLog {
    fn name(&self) -> &'static str {
        "access_log"
    }

    fn process<'a>(&'a self, mut request: Request, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let start_time = Local::now().fixed_offset();
            let started = Instant::now();
            let (_traffic, request_count) = Traffic::enter(&self.traffic);

            let meta = RequestMeta::ensure(&mut request);
            let info = RequestInfo::from_request(&request);
            let user_agent = request
                .headers()
                .get(header::USER_AGENT)
                .and_then(|value| value.to_str().ok())
                .unwrap_or_default()
                .to_string();

            let response = next.run(request).await;
            if meta.should_ignore() {
                return response;
            }

            let details = Details {
                server_name: meta.server_name().map(|name| name.to_string()).unwrap_or_default(),
                handler_name: meta.handler_name().map(|name| name.to_string()).unwrap_or_default(),
                user_agent,
                status: response.status(),
                start_time,
                duration: started.elapsed(),
                bytes_written: body_len(&response),
                request_count,
            };
            self.logger.log(&details, &info);
            response
        })
    }
}

/// Marks whether access logs and metrics should skip `request`.
pub fn set_should_ignore(request: &mut Request, ignore: bool) {
    RequestMeta::ensure(request).set_should_ignore(ignore);
}

/// Reports whether `request` was marked to be skipped.
pub fn should_ignore(request: &Request) -> bool {
    RequestMeta::of(request).is_some_and(RequestMeta::should_ignore)
}

/// A handler whose requests are skipped by access logs and metrics.
///
/// Useful for health checks and other high-frequency, low-value routes.
#[derive(Debug, Clone)]
pub struct IgnoreHandler<H> {
    inner: H,
}

impl<H: Handler> IgnoreHandler<H> {
    /// Wraps `inner`.
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

impl<H: Handler> Handler for IgnoreHandler<H> {
    fn call(&self, mut request: Request) -> BoxFuture<'static, Response> {
        set_should_ignore(&mut request, true);
        self.inner.call(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::Full;
    use parking_lot::Mutex;
    use serv_core::{handler_fn, Chain, MemoryWriter, NoContent, ResponseExt};

    #[derive(Default)]
    struct Capture(Mutex<Vec<(Details, RequestInfo)>>);

    impl AccessLogger for Capture {
        fn log(&self, details: &Details, request: &RequestInfo) {
            self.0.lock().push((details.clone(), request.clone()));
        }
    }

    fn details(status: StatusCode) -> Details {
        Details {
            server_name: String::new(),
            handler_name: String::new(),
            user_agent: String::new(),
            status,
            start_time: DateTime::parse_from_rfc3339("2023-10-05T13:55:36-07:00").unwrap(),
            duration: Duration::from_millis(3),
            bytes_written: 2326,
            request_count: 1,
        }
    }

    fn info() -> RequestInfo {
        RequestInfo {
            remote_addr: Some("127.0.0.1:52814".parse().unwrap()),
            method: Method::GET,
            uri: "/apache_pb.gif?x=1".to_string(),
            version: Version::HTTP_10,
            username: Some("frank".to_string()),
        }
    }

    fn request(uri: &str) -> Request {
        let mut req = http::Request::builder()
            .uri(uri)
            .header(header::USER_AGENT, "test-agent")
            .body(Full::new(Bytes::new()))
            .unwrap();
        req.extensions_mut()
            .insert(RequestMeta::new(Some("10.0.0.7:4000".parse().unwrap()), false));
        req
    }

    #[test]
    fn test_clf_line() {
        assert_eq!(
            ClfFormat::line(&details(StatusCode::OK), &info()),
            "127.0.0.1 - frank [05/Oct/2023:13:55:36 -0700] \"GET /apache_pb.gif?x=1 HTTP/1.0\" 200 2326"
        );
    }

    #[test]
    fn test_generic_line_uses_dash_for_missing_names() {
        let mut request = info();
        request.remote_addr = None;
        assert_eq!(
            GenericFormat::line(&details(StatusCode::NOT_FOUND), &request),
            "- - \"GET /apache_pb.gif?x=1 HTTP/1.0\" 404 2326b"
        );

        let mut named = details(StatusCode::OK);
        named.handler_name = "gif".to_string();
        assert_eq!(
            GenericFormat::line(&named, &info()),
            "127.0.0.1 gif \"GET /apache_pb.gif?x=1 HTTP/1.0\" 200 2326b"
        );
    }

    #[test]
    fn test_username_from_basic_auth() {
        let mut req = request("/");
        req.headers_mut().insert(
            header::AUTHORIZATION,
            "Basic YWxhZGRpbjpvcGVuc2VzYW1l".parse().unwrap(),
        );
        assert_eq!(RequestInfo::from_request(&req).username.as_deref(), Some("aladdin"));

        req.headers_mut()
            .insert(header::AUTHORIZATION, "Bearer token".parse().unwrap());
        assert_eq!(RequestInfo::from_request(&req).username, None);
    }

    #[test]
    fn test_writes_through_line_writer() {
        let out = Arc::new(MemoryWriter::new());
        GenericFormat::with_writer(out.clone()).log(&details(StatusCode::OK), &info());
        assert_eq!(out.lines().len(), 1);
    }

    #[test]
    fn test_limit_codes_filters_lines() {
        let capture = Arc::new(Capture::default());
        let limited = LimitCodes::new(crate::ResponseStatus::ERRORS, Arc::clone(&capture));
        limited.log(&details(StatusCode::OK), &info());
        limited.log(&details(StatusCode::BAD_REQUEST), &info());
        assert_eq!(capture.0.lock().len(), 1);
        assert_eq!(capture.0.lock()[0].0.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_middleware_collects_details() {
        let capture = Arc::new(Capture::default());
        let handler = handler_fn(|req: Request| async move {
            RequestMeta::of(&req).unwrap().set_handler_name("hello");
            Response::text(StatusCode::OK, "hello")
        });
        let chain = Chain::new(
            vec![Arc::new(AccessLog::shared(capture.clone()))],
            Arc::new(handler),
        );

        let response = chain.call(request("/hello?name=x")).await;
        assert_eq!(response.status(), StatusCode::OK);

        let logged = capture.0.lock();
        let (details, info) = &logged[0];
        assert_eq!(details.handler_name, "hello");
        assert_eq!(details.user_agent, "test-agent");
        assert_eq!(details.bytes_written, 5);
        assert_eq!(details.request_count, 1);
        assert_eq!(info.uri, "/hello?name=x");
        assert_eq!(info.remote_host(), "10.0.0.7");
    }

    #[tokio::test]
    async fn test_ignored_requests_are_not_logged() {
        let capture = Arc::new(Capture::default());
        let chain = Chain::new(
            vec![Arc::new(AccessLog::shared(capture.clone()))],
            Arc::new(IgnoreHandler::new(NoContent)),
        );

        let response = chain.call(request("/health")).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(capture.0.lock().is_empty());
    }

    #[tokio::test]
    async fn test_counts_concurrent_requests() {
        let capture = Arc::new(Capture::default());
        let log = Arc::new(AccessLog::shared(capture.clone()));
        let (release, wait) = tokio::sync::watch::channel(false);
        let handler = handler_fn(move |_req: Request| {
            let mut wait = wait.clone();
            async move {
                let _ = wait.wait_for(|released| *released).await;
                Response::no_content()
            }
        });
        let chain = Arc::new(Chain::new(vec![log.clone()], Arc::new(handler)));

        let first = tokio::spawn({
            let chain = Arc::clone(&chain);
            async move { chain.call(request("/a")).await }
        });
        let second = tokio::spawn({
            let chain = Arc::clone(&chain);
            async move { chain.call(request("/b")).await }
        });
        while log.active_requests() < 2 {
            tokio::task::yield_now().await;
        }
        release.send(true).unwrap();
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(log.active_requests(), 0);
        let mut counts: Vec<_> = capture.0.lock().iter().map(|(d, _)| d.request_count).collect();
        counts.sort_unstable();
        assert_eq!(counts, vec![1, 2]);
    }

    #[test]
    fn test_should_ignore_helpers() {
        let mut req = request("/");
        assert!(!should_ignore(&req));
        set_should_ignore(&mut req, true);
        assert!(should_ignore(&req));
    }
}
