//! Common request and response types.
//!
//! Every handler, middleware and router in serv works on fully buffered
//! bodies, which keeps the handler contract synchronous to reason about.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use http_body_util::Full;
use serde::Serialize;

/// The HTTP request type handled by serv.
///
/// This is a standard `http::Request` with a `Full<Bytes>` body.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type produced by serv handlers.
///
/// This is a standard `http::Response` with a `Full<Bytes>` body.
pub type Response = http::Response<Full<Bytes>>;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Content type used by [`ResponseExt::json`].
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Content type used by [`ResponseExt::text`].
pub const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";

/// Extension trait for building common responses.
pub trait ResponseExt {
    /// Creates an empty response with the given status code.
    fn empty(status: StatusCode) -> Response;

    /// Creates an HTTP 204 "no content" response.
    fn no_content() -> Response;

    /// Creates an HTTP 404 "not found" response.
    fn not_found() -> Response;

    /// Creates a plain text response.
    fn text(status: StatusCode, body: impl Into<String>) -> Response;

    /// Serializes `value` as JSON and sets the `Content-Type` header.
    ///
    /// When serialization fails an HTTP 500 response is returned instead.
    fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Response;
}

impl ResponseExt for Response {
    fn empty(status: StatusCode) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::new()));
        *response.status_mut() = status;
        response
    }

    fn no_content() -> Response {
        Self::empty(StatusCode::NO_CONTENT)
    }

    fn not_found() -> Response {
        Self::text(StatusCode::NOT_FOUND, "404 page not found\n")
    }

    fn text(status: StatusCode, body: impl Into<String>) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::from(body.into())));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static(CONTENT_TYPE_TEXT),
        );
        response
    }

    fn json<T: Serialize + ?Sized>(status: StatusCode, value: &T) -> Response {
        match serde_json::to_vec(value) {
            Ok(body) => {
                let mut response = http::Response::new(Full::new(Bytes::from(body)));
                *response.status_mut() = status;
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static(CONTENT_TYPE_JSON),
                );
                response
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to encode json response");
                Self::text(StatusCode::INTERNAL_SERVER_ERROR, "internal server error\n")
            }
        }
    }
}

/// Returns the number of body bytes remaining in `response`.
pub fn body_len(response: &Response) -> u64 {
    let hint = hyper::body::Body::size_hint(response.body());
    hint.exact().unwrap_or_else(|| hint.lower())
}
