//! Request metrics collection.
//!
//! [`Collector`] measures each request and passes a [`Metrics`] record to its
//! [`Recorder`]s once the response is ready. Recorders run synchronously on
//! the request task, so they should be quick.
//!
//! [`FacadeRecorder`] forwards the measurements to the `metrics` crate facade:
//!
//! | Metric                                        | Type      | Labels                       |
//! |-----------------------------------------------|-----------|------------------------------|
//! | `{namespace}_{subsystem}_active_requests`     | Gauge     | `server`                     |
//! | `{namespace}_{subsystem}_requests_total`      | Counter   | `server`, `handler`, `method`, `code` |
//! | `{namespace}_{subsystem}_duration_ms`         | Histogram | `server`, `handler`, `method`, `code` |
//! | `{namespace}_{subsystem}_response_size_bytes` | Histogram | `server`, `handler`, `method`, `code` |
//!
//! Installing an exporter for the facade is up to the application.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use http::StatusCode;
use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use serv_core::{body_len, BoxFuture, Middleware, Next, Request, RequestMeta, Response};

use crate::access_log::RequestInfo;
use crate::status::LimitCodes;

/// Subsystem used by [`FacadeRecorder`] unless another one is set.
pub const DEFAULT_SUBSYSTEM: &str = "http_server";

/// Measurements of a single request.
#[derive(Debug, Clone)]
pub struct Metrics {
    /// Response status code.
    pub code: StatusCode,
    /// How long the handler took.
    pub duration: Duration,
    /// Size of the response body.
    pub written: u64,
    /// When the request was received.
    pub time: SystemTime,
    /// Requests in flight through the same collector, this one included.
    pub traffic: usize,
    /// Name of the server that received the request.
    pub server_name: String,
    /// Name of the route that handled the request.
    pub handler_name: String,
}

/// Receives request measurements.
pub trait Recorder: Send + Sync + 'static {
    /// Called before the request is handled.
    fn started(&self, _request: &RequestInfo, _server_name: &str) {}

    /// Called after the request is handled, also when it was cancelled.
    fn finished(&self, _request: &RequestInfo, _server_name: &str) {}

    /// Records the measurements of a completed request.
    fn record(&self, metrics: &Metrics, request: &RequestInfo);
}

impl<R: Recorder + ?Sized> Recorder for Arc<R> {
    fn started(&self, request: &RequestInfo, server_name: &str) {
        (**self).started(request, server_name);
    }

    fn finished(&self, request: &RequestInfo, server_name: &str) {
        (**self).finished(request, server_name);
    }

    fn record(&self, metrics: &Metrics, request: &RequestInfo) {
        (**self).record(metrics, request);
    }
}

// Start and finish always pass through so in-flight gauges stay balanced.
impl<R: Recorder> Recorder for LimitCodes<R> {
    fn started(&self, request: &RequestInfo, server_name: &str) {
        self.inner().started(request, server_name);
    }

    fn finished(&self, request: &RequestInfo, server_name: &str) {
        self.inner().finished(request, server_name);
    }

    fn record(&self, metrics: &Metrics, request: &RequestInfo) {
        if self.allows(metrics.code) {
            self.inner().record(metrics, request);
        }
    }
}

/// Middleware that measures requests and reports them to recorders.
#[derive(Default)]
pub struct Collector {
    recorders: Vec<Arc<dyn Recorder>>,
    traffic: AtomicUsize,
}

impl Collector {
    /// Creates a collector reporting to `recorder`.
    pub fn new(recorder: impl Recorder) -> Self {
        Self::default().with_recorder(recorder)
    }

    /// Adds another recorder.
    pub fn with_recorder(mut self, recorder: impl Recorder) -> Self {
        self.recorders.push(Arc::new(recorder));
        self
    }

    /// Requests currently in flight.
    pub fn active_requests(&self) -> usize {
        self.traffic.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collector")
            .field("recorders", &self.recorders.len())
            .field("active_requests", &self.active_requests())
            .finish()
    }
}

struct InFlight<'a> {
    collector: &'a Collector,
    request: &'a RequestInfo,
    server_name: &'a str,
}

impl<'a> InFlight<'a> {
    fn enter(collector: &'a Collector, request: &'a RequestInfo, server_name: &'a str) -> (Self, usize) {
        let traffic = collector.traffic.fetch_add(1, Ordering::AcqRel) + 1;
        for recorder in &collector.recorders {
            recorder.started(request, server_name);
        }
        (
            Self {
                collector,
                request,
                server_name,
            },
            traffic,
        )
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.collector.traffic.fetch_sub(1, Ordering::AcqRel);
        for recorder in &self.collector.recorders {
            recorder.finished(self.request, self.server_name);
        }
    }
}

impl Middleware for Collector {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn process<'a>(&'a self, mut request: Request, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if self.recorders.is_empty() {
                return next.run(request).await;
            }

            let time = SystemTime::now();
            let started = Instant::now();
            let meta = RequestMeta::ensure(&mut request);
            let info = RequestInfo::from_request(&request);
            let server_name = meta.server_name().map(|name| name.to_string()).unwrap_or_default();

            let (in_flight, traffic) = InFlight::enter(self, &info, &server_name);
            let response = next.run(request).await;
            let duration = started.elapsed();

            if !meta.should_ignore() {
                let metrics = Metrics {
                    code: response.status(),
                    duration,
                    written: body_len(&response),
                    time,
                    traffic,
                    server_name: server_name.clone(),
                    handler_name: meta.handler_name().map(|name| name.to_string()).unwrap_or_default(),
                };
                for recorder in &self.recorders {
                    recorder.record(&metrics, &info);
                }
            }
            drop(in_flight);
            response
        })
    }
}

/// Forwards measurements to the `metrics` crate facade.
#[derive(Debug, Clone)]
pub struct FacadeRecorder {
    active_requests: String,
    requests_total: String,
    duration: String,
    response_size: String,
}

impl FacadeRecorder {
    /// Creates a recorder using `namespace` and the default subsystem.
    pub fn new(namespace: &str) -> Self {
        Self::with_subsystem(namespace, DEFAULT_SUBSYSTEM)
    }

    /// Creates a recorder using `namespace` and `subsystem`. Empty parts are
    /// left out of the metric names.
    pub fn with_subsystem(namespace: &str, subsystem: &str) -> Self {
        let name = |metric: &str| {
            [namespace, subsystem, metric]
                .into_iter()
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join("_")
        };
        Self {
            active_requests: name("active_requests"),
            requests_total: name("requests_total"),
            duration: name("duration_ms"),
            response_size: name("response_size_bytes"),
        }
    }

    /// Name of the in-flight requests gauge.
    pub fn active_requests_name(&self) -> &str {
        &self.active_requests
    }

    /// Name of the request duration histogram.
    pub fn duration_name(&self) -> &str {
        &self.duration
    }

    /// Name of the response size histogram.
    pub fn response_size_name(&self) -> &str {
        &self.response_size
    }

    /// Registers descriptions and units with the installed recorder.
    pub fn describe(&self) {
        describe_gauge!(
            self.active_requests.clone(),
            Unit::Count,
            "Number of HTTP requests currently being processed"
        );
        describe_counter!(
            self.requests_total.clone(),
            Unit::Count,
            "Total number of HTTP requests processed"
        );
        describe_histogram!(
            self.duration.clone(),
            Unit::Milliseconds,
            "HTTP request duration in milliseconds"
        );
        describe_histogram!(
            self.response_size.clone(),
            Unit::Bytes,
            "HTTP response body size in bytes"
        );
    }
}

impl Recorder for FacadeRecorder {
    fn started(&self, _request: &RequestInfo, server_name: &str) {
        gauge!(self.active_requests.clone(), "server" => server_name.to_string()).increment(1.0);
    }

    fn finished(&self, _request: &RequestInfo, server_name: &str) {
        gauge!(self.active_requests.clone(), "server" => server_name.to_string()).decrement(1.0);
    }

    fn record(&self, metrics: &Metrics, request: &RequestInfo) {
        let labels = [
            ("server", metrics.server_name.clone()),
            ("handler", metrics.handler_name.clone()),
            ("method", request.method.to_string()),
            ("code", metrics.code.as_str().to_string()),
        ];

        counter!(self.requests_total.clone(), &labels).increment(1);
        histogram!(self.duration.clone(), &labels).record(metrics.duration.as_secs_f64() * 1000.0);
        histogram!(self.response_size.clone(), &labels).record(metrics.written as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::Full;
    use parking_lot::Mutex;
    use serv_core::{handler_fn, Chain, Handler, ResponseExt};

    #[derive(Default)]
    struct Capture {
        events: Mutex<Vec<&'static str>>,
        records: Mutex<Vec<Metrics>>,
    }

    impl Recorder for Capture {
        fn started(&self, _request: &RequestInfo, _server_name: &str) {
            self.events.lock().push("started");
        }

        fn finished(&self, _request: &RequestInfo, _server_name: &str) {
            self.events.lock().push("finished");
        }

        fn record(&self, metrics: &Metrics, _request: &RequestInfo) {
            self.events.lock().push("record");
            self.records.lock().push(metrics.clone());
        }
    }

    fn request() -> Request {
        let mut req = http::Request::new(Full::new(Bytes::new()));
        RequestMeta::ensure(&mut req).set_server_name("api");
        req
    }

    fn teapot() -> impl Handler {
        handler_fn(|req: Request| async move {
            RequestMeta::of(&req).unwrap().set_handler_name("pot");
            Response::text(StatusCode::IM_A_TEAPOT, "short and stout")
        })
    }

    #[tokio::test]
    async fn test_collector_records_metrics() {
        let capture = Arc::new(Capture::default());
        let chain = Chain::new(vec![Arc::new(Collector::new(capture.clone()))], Arc::new(teapot()));

        let response = chain.call(request()).await;
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);

        assert_eq!(*capture.events.lock(), vec!["started", "record", "finished"]);
        let records = capture.records.lock();
        assert_eq!(records[0].code, StatusCode::IM_A_TEAPOT);
        assert_eq!(records[0].written, 15);
        assert_eq!(records[0].traffic, 1);
        assert_eq!(records[0].server_name, "api");
        assert_eq!(records[0].handler_name, "pot");
    }

    #[tokio::test]
    async fn test_limit_codes_keeps_start_and_finish() {
        let capture = Arc::new(Capture::default());
        let limited = LimitCodes::new(crate::ResponseStatus::SERVER_ERROR, capture.clone());
        let chain = Chain::new(vec![Arc::new(Collector::new(limited))], Arc::new(teapot()));

        chain.call(request()).await;
        assert_eq!(*capture.events.lock(), vec!["started", "finished"]);
    }

    #[tokio::test]
    async fn test_ignored_requests_are_not_recorded() {
        let capture = Arc::new(Capture::default());
        let chain = Chain::new(
            vec![Arc::new(Collector::new(capture.clone()))],
            Arc::new(crate::IgnoreHandler::new(teapot())),
        );

        chain.call(request()).await;
        assert!(capture.records.lock().is_empty());
        assert_eq!(*capture.events.lock(), vec!["started", "finished"]);
    }

    #[test]
    fn test_facade_names() {
        let recorder = FacadeRecorder::new("shop");
        assert_eq!(recorder.active_requests_name(), "shop_http_server_active_requests");
        assert_eq!(recorder.duration_name(), "shop_http_server_duration_ms");
        assert_eq!(recorder.response_size_name(), "shop_http_server_response_size_bytes");

        let bare = FacadeRecorder::with_subsystem("", "web");
        assert_eq!(bare.active_requests_name(), "web_active_requests");
    }

    #[tokio::test]
    async fn test_facade_without_installed_recorder_is_noop() {
        let recorder = FacadeRecorder::new("test");
        recorder.describe();
        let chain = Chain::new(vec![Arc::new(Collector::new(recorder))], Arc::new(teapot()));
        assert_eq!(chain.call(request()).await.status(), StatusCode::IM_A_TEAPOT);
    }
}
