//! CORS (Cross-Origin Resource Sharing) response headers.
//!
//! [`AccessControl`] formats the `Access-Control-*` response headers. The
//! [`Cors`] middleware adds them to every response and answers preflight
//! requests itself.
//!
//! ## Allow-Origin resolution
//!
//! - No allowed origins: the header is omitted.
//! - A single allowed origin is sent as is, except that `*` is replaced by
//!   the request's `Origin` when credentials are allowed.
//! - With several allowed origins, a wildcard combined with credentials echoes
//!   the request's `Origin`; otherwise a listed origin is echoed and `*` is the
//!   fallback when the list contains it.
//!
//! Whenever `Access-Control-Allow-Origin` is set, `Vary: Origin` is added.
//!
//! ## Example
//!
//! ```
//! use serv_middleware::cors::{AccessControl, Cors};
//! use std::time::Duration;
//!
//! let cors = Cors::new(AccessControl {
//!     allow_origin: vec!["https://app.example.com".into()],
//!     allow_credentials: true,
//!     max_age: Duration::from_secs(600),
//!     ..AccessControl::default()
//! });
//! # let _ = cors;
//! ```

use std::time::Duration;

use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use serv_core::{BoxFuture, Middleware, Next, Request, Response, ResponseExt};

use crate::headers::{set_header, HeaderModifier};

/// Methods commonly allowed for cross-origin requests.
pub fn default_methods() -> Vec<Method> {
    vec![
        Method::GET,
        Method::POST,
        Method::PATCH,
        Method::PUT,
        Method::DELETE,
        Method::OPTIONS,
    ]
}

/// The `Access-Control-*` response headers to send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessControl {
    /// `Access-Control-Allow-Credentials: true` when set.
    pub allow_credentials: bool,
    /// `Access-Control-Allow-Headers`; `*` anywhere in the list sends `*`.
    pub allow_headers: Vec<String>,
    /// `Access-Control-Allow-Methods`.
    pub allow_methods: Vec<Method>,
    /// Origins allowed to read responses. See the module docs for how the
    /// response header is resolved.
    pub allow_origin: Vec<String>,
    /// `Access-Control-Expose-Headers`; `*` anywhere in the list sends `*`.
    pub expose_headers: Vec<String>,
    /// `Access-Control-Max-Age`, rounded to whole seconds and omitted below
    /// one second.
    pub max_age: Duration,
}

impl AccessControl {
    /// Resolves the `Access-Control-Allow-Origin` value for a request from
    /// `origin`.
    pub fn resolve_allow_origin(&self, origin: Option<&str>) -> Option<String> {
        let origin = origin.filter(|origin| !origin.is_empty());
        match self.allow_origin.as_slice() {
            [] => None,
            [only] => {
                if only == "*" && self.allow_credentials {
                    if let Some(origin) = origin {
                        return Some(origin.to_string());
                    }
                }
                Some(only.clone())
            }
            list => {
                let wildcard = list.iter().any(|allowed| allowed == "*");
                if let Some(origin) = origin {
                    if (wildcard && self.allow_credentials) || list.iter().any(|allowed| allowed == origin) {
                        return Some(origin.to_string());
                    }
                }
                wildcard.then(|| "*".to_string())
            }
        }
    }

    /// Writes the headers for a request from `origin` into `headers`.
    pub fn apply(&self, headers: &mut HeaderMap, origin: Option<&str>) {
        if self.allow_credentials {
            headers.insert(
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            );
        }
        if !self.allow_headers.is_empty() {
            set_header(
                headers,
                header::ACCESS_CONTROL_ALLOW_HEADERS,
                &join_or_wildcard(&self.allow_headers),
            );
        }
        if !self.allow_methods.is_empty() {
            let methods: Vec<&str> = self.allow_methods.iter().map(Method::as_str).collect();
            set_header(headers, header::ACCESS_CONTROL_ALLOW_METHODS, &methods.join(", "));
        }
        if let Some(allow) = self.resolve_allow_origin(origin) {
            set_header(headers, header::ACCESS_CONTROL_ALLOW_ORIGIN, &allow);
            headers.append(header::VARY, HeaderValue::from_static("Origin"));
        }
        if !self.expose_headers.is_empty() {
            set_header(
                headers,
                header::ACCESS_CONTROL_EXPOSE_HEADERS,
                &join_or_wildcard(&self.expose_headers),
            );
        }
        if let Some(secs) = max_age_secs(self.max_age) {
            headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from(secs));
        }
    }
}

impl HeaderModifier for AccessControl {
    fn modify_header(&self, headers: &mut HeaderMap) {
        self.apply(headers, None);
    }
}

fn join_or_wildcard(values: &[String]) -> String {
    if values.iter().any(|value| value == "*") {
        "*".to_string()
    } else {
        values.join(", ")
    }
}

fn max_age_secs(max_age: Duration) -> Option<u64> {
    let secs = max_age.as_secs_f64().round();
    (secs >= 1.0).then_some(secs as u64)
}

/// Middleware adding [`AccessControl`] headers to every response.
///
/// Preflight requests (`OPTIONS` with `Access-Control-Request-Method`) are
/// answered with `204 No Content` without invoking the handler.
#[derive(Debug, Clone)]
pub struct Cors {
    access: AccessControl,
}

impl Cors {
    /// Creates the middleware.
    pub fn new(access: AccessControl) -> Self {
        Self { access }
    }

    /// The configured headers.
    pub fn access_control(&self) -> &AccessControl {
        &self.access
    }
}

fn is_preflight(request: &Request) -> bool {
    request.method() == Method::OPTIONS
        && request
            .headers()
            .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
}

impl Middleware for Cors {
    fn name(&self) -> &'static str {
        "cors"
    }

    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let origin = request
                .headers()
                .get(header::ORIGIN)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);

            let mut response = if is_preflight(&request) {
                Response::empty(StatusCode::NO_CONTENT)
            } else {
                next.run(request).await
            };
            self.access.apply(response.headers_mut(), origin.as_deref());
            response
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::Full;
    use serv_core::{Chain, Handler, NotFound};
    use std::sync::Arc;

    fn allow(origins: &[&str], credentials: bool) -> AccessControl {
        AccessControl {
            allow_origin: origins.iter().map(|origin| origin.to_string()).collect(),
            allow_credentials: credentials,
            ..AccessControl::default()
        }
    }

    #[test]
    fn test_resolve_allow_origin() {
        let foo = Some("https://foo.bar");

        assert_eq!(allow(&[], false).resolve_allow_origin(foo), None);
        assert_eq!(allow(&["*"], false).resolve_allow_origin(foo).as_deref(), Some("*"));
        assert_eq!(
            allow(&["*"], true).resolve_allow_origin(foo).as_deref(),
            Some("https://foo.bar")
        );
        assert_eq!(allow(&["*"], true).resolve_allow_origin(None).as_deref(), Some("*"));
        assert_eq!(
            allow(&["https://qux.xoo"], false).resolve_allow_origin(foo).as_deref(),
            Some("https://qux.xoo")
        );

        let list = allow(&["https://qux.xoo", "https://foo.bar"], false);
        assert_eq!(list.resolve_allow_origin(foo).as_deref(), Some("https://foo.bar"));
        assert_eq!(list.resolve_allow_origin(Some("https://evil.example")), None);

        let with_wildcard = allow(&["https://qux.xoo", "*"], false);
        assert_eq!(
            with_wildcard.resolve_allow_origin(Some("https://evil.example")).as_deref(),
            Some("*")
        );
        let with_credentials = allow(&["https://qux.xoo", "*"], true);
        assert_eq!(
            with_credentials.resolve_allow_origin(Some("https://evil.example")).as_deref(),
            Some("https://evil.example")
        );
    }

    #[test]
    fn test_apply_formats_headers() {
        let access = AccessControl {
            allow_credentials: true,
            allow_headers: vec!["Content-Type".into(), "X-Request-Id".into()],
            allow_methods: vec![Method::GET, Method::POST],
            allow_origin: vec!["https://foo.bar".into()],
            expose_headers: vec!["X-Trace".into(), "*".into()],
            max_age: Duration::from_millis(90_600),
        };
        let mut headers = HeaderMap::new();
        access.apply(&mut headers, Some("https://foo.bar"));

        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type, X-Request-Id");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "GET, POST");
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://foo.bar");
        assert_eq!(headers[header::ACCESS_CONTROL_EXPOSE_HEADERS], "*");
        assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "91");
        assert_eq!(headers[header::VARY], "Origin");
    }

    #[test]
    fn test_max_age_below_one_second_is_omitted() {
        assert_eq!(max_age_secs(Duration::from_millis(400)), None);
        assert_eq!(max_age_secs(Duration::from_millis(500)), Some(1));
        assert_eq!(max_age_secs(Duration::ZERO), None);
    }

    #[tokio::test]
    async fn test_preflight_short_circuits() {
        let chain = Chain::new(
            vec![Arc::new(Cors::new(AccessControl {
                allow_methods: default_methods(),
                ..allow(&["*"], false)
            }))],
            Arc::new(NotFound),
        );
        let request = http::Request::builder()
            .method(Method::OPTIONS)
            .header(header::ORIGIN, "https://foo.bar")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "PUT")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let response = chain.call(request).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS],
            "GET, POST, PATCH, PUT, DELETE, OPTIONS"
        );
    }

    #[tokio::test]
    async fn test_regular_request_reaches_handler() {
        let chain = Chain::new(
            vec![Arc::new(Cors::new(allow(&["*"], true)))],
            Arc::new(NotFound),
        );
        let request = http::Request::builder()
            .header(header::ORIGIN, "https://foo.bar")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let response = chain.call(request).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://foo.bar");
    }
}
