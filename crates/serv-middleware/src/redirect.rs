//! Redirecting middleware.
//!
//! Both redirects answer `301 Moved Permanently` for `GET` and
//! `307 Temporary Redirect` for every other method, so clients repeat
//! non-`GET` requests with the same method and body.

use http::{header, HeaderValue, Method, StatusCode};
use serv_core::{BoxFuture, Middleware, Next, Request, RequestMeta, Response, ResponseExt};

/// The redirect status for `method`.
pub fn redirect_status(method: &Method) -> StatusCode {
    if method == Method::GET {
        StatusCode::MOVED_PERMANENTLY
    } else {
        StatusCode::TEMPORARY_REDIRECT
    }
}

fn redirect(method: &Method, location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(location) => {
            let mut response = Response::empty(redirect_status(method));
            response.headers_mut().insert(header::LOCATION, location);
            response
        }
        Err(_) => Response::empty(StatusCode::BAD_REQUEST),
    }
}

/// Redirects plain-text requests to the same URL over `https`.
///
/// Requests on TLS connections pass through. The target host is taken from
/// the request URI or the `Host` header, without its port, so the default
/// `https` port is used. Requests carrying neither pass through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedirectHttps;

impl RedirectHttps {
    fn location(request: &Request) -> Option<String> {
        let uri = request.uri();
        if uri.scheme_str() == Some("https") {
            return None;
        }
        let host = match uri.authority() {
            Some(authority) => authority.host().to_string(),
            None => {
                let host = request.headers().get(header::HOST)?.to_str().ok()?;
                host.parse::<http::uri::Authority>().ok()?.host().to_string()
            }
        };
        let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
        Some(format!("https://{host}{path}"))
    }
}

impl Middleware for RedirectHttps {
    fn name(&self) -> &'static str {
        "redirect_https"
    }

    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let secure = RequestMeta::of(&request).is_some_and(RequestMeta::is_secure);
            match Self::location(&request).filter(|_| !secure) {
                Some(location) => redirect(request.method(), &location),
                None => next.run(request).await,
            }
        })
    }
}

/// Redirects paths ending in `/` to the same path without trailing slashes.
///
/// The root path `/` is left alone. The query string is kept.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveTrailingSlash;

impl RemoveTrailingSlash {
    fn location(request: &Request) -> Option<String> {
        let path = request.uri().path();
        if path == "/" || !path.ends_with('/') {
            return None;
        }
        let trimmed = path.trim_end_matches('/');
        let trimmed = if trimmed.is_empty() { "/" } else { trimmed };
        Some(match request.uri().query() {
            Some(query) => format!("{trimmed}?{query}"),
            None => trimmed.to_string(),
        })
    }
}

impl Middleware for RemoveTrailingSlash {
    fn name(&self) -> &'static str {
        "remove_trailing_slash"
    }

    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            match Self::location(&request) {
                Some(location) => redirect(request.method(), &location),
                None => next.run(request).await,
            }
        })
    }
}
