//! Header formatting helpers and header-setting middleware.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http::header::{self, HeaderName};
use http::{HeaderMap, HeaderValue};
use serv_core::{BoxFuture, Middleware, Next, Request, Response};

/// Changes a set of headers.
pub trait HeaderModifier: Send + Sync + 'static {
    /// Applies the change to `headers`.
    fn modify_header(&self, headers: &mut HeaderMap);
}

impl<F> HeaderModifier for F
where
    F: Fn(&mut HeaderMap) + Send + Sync + 'static,
{
    fn modify_header(&self, headers: &mut HeaderMap) {
        self(headers);
    }
}

/// Applies every modifier in order.
pub fn modify(headers: &mut HeaderMap, modifiers: &[&dyn HeaderModifier]) {
    for modifier in modifiers {
        modifier.modify_header(headers);
    }
}

pub(crate) fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::debug!(header = %name, "skipping header with invalid value"),
    }
}

/// Sets `Expires` to `time`.
pub fn set_expires(headers: &mut HeaderMap, time: SystemTime) {
    set_header(headers, header::EXPIRES, &httpdate::fmt_http_date(time));
}

/// Sets `Last-Modified` to `time`.
pub fn set_last_modified(headers: &mut HeaderMap, time: SystemTime) {
    set_header(headers, header::LAST_MODIFIED, &httpdate::fmt_http_date(time));
}

/// The directives of a `Cache-Control` response header.
///
/// Directives are written in a fixed order: `private`, `public`, `max-age`,
/// `s-maxage`, `stale-while-revalidate`, `stale-if-error`, `must-revalidate`,
/// `proxy-revalidate`, `must-understand`, `no-cache`, `no-store`,
/// `no-transform`, `immutable`. Durations are written in whole seconds and
/// only when longer than one second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheControl {
    /// Only private caches may store the response.
    pub private: bool,
    /// Shared caches may store the response.
    pub public: bool,
    /// How long the response stays fresh.
    pub max_age: Duration,
    /// Like `max_age`, for shared caches.
    pub s_maxage: Duration,
    /// How long a stale response may be used while revalidating.
    pub stale_while_revalidate: Duration,
    /// How long a stale response may be used when the origin errors.
    pub stale_if_error: Duration,
    /// Stale responses must be revalidated before reuse.
    pub must_revalidate: bool,
    /// `must_revalidate` for shared caches.
    pub proxy_revalidate: bool,
    /// Only store the response when its status code is understood.
    pub must_understand: bool,
    /// Revalidate before every reuse.
    pub no_cache: bool,
    /// Do not store the response at all.
    pub no_store: bool,
    /// Intermediaries must not transform the content.
    pub no_transform: bool,
    /// The response does not change while fresh.
    pub immutable: bool,
}

fn push_seconds(directives: &mut Vec<String>, name: &str, value: Duration) -> bool {
    if value > Duration::from_secs(1) {
        directives.push(format!("{name}={}", value.as_secs()));
        true
    } else {
        false
    }
}

impl fmt::Display for CacheControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut directives: Vec<String> = Vec::new();
        if self.private {
            directives.push("private".to_string());
        }
        if self.public {
            directives.push("public".to_string());
        }

        if !push_seconds(&mut directives, "max-age", self.max_age) && self.private && self.no_cache {
            directives.push("max-age=0".to_string());
        }
        push_seconds(&mut directives, "s-maxage", self.s_maxage);
        push_seconds(&mut directives, "stale-while-revalidate", self.stale_while_revalidate);
        push_seconds(&mut directives, "stale-if-error", self.stale_if_error);

        for (on, name) in [
            (self.must_revalidate, "must-revalidate"),
            (self.proxy_revalidate, "proxy-revalidate"),
            (self.must_understand, "must-understand"),
            (self.no_cache, "no-cache"),
            (self.no_store, "no-store"),
            (self.no_transform, "no-transform"),
            (self.immutable, "immutable"),
        ] {
            if on {
                directives.push(name.to_string());
            }
        }
        f.write_str(&directives.join(", "))
    }
}

impl HeaderModifier for CacheControl {
    /// Sets `Cache-Control`, or removes it when no directive is set. A
    /// `no-cache` directive also sets `Pragma: no-cache` for HTTP/1.0 caches.
    fn modify_header(&self, headers: &mut HeaderMap) {
        let value = self.to_string();
        if value.is_empty() {
            headers.remove(header::CACHE_CONTROL);
            return;
        }
        set_header(headers, header::CACHE_CONTROL, &value);
        if self.no_cache {
            headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        }
    }
}

/// Marks responses as not cacheable.
///
/// Sets `Cache-Control: private, max-age=0, no-cache`, `Pragma: no-cache` and
/// an `Expires` date in the past. Usable as a [`HeaderModifier`] and as
/// [`Middleware`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCache;

/// Returns the [`NoCache`] modifier.
pub fn no_cache() -> NoCache {
    NoCache
}

impl NoCache {
    const CACHE_CONTROL: CacheControl = CacheControl {
        private: true,
        public: false,
        max_age: Duration::ZERO,
        s_maxage: Duration::ZERO,
        stale_while_revalidate: Duration::ZERO,
        stale_if_error: Duration::ZERO,
        must_revalidate: false,
        proxy_revalidate: false,
        must_understand: false,
        no_cache: true,
        no_store: false,
        no_transform: false,
        immutable: false,
    };
}

impl HeaderModifier for NoCache {
    fn modify_header(&self, headers: &mut HeaderMap) {
        set_expires(headers, UNIX_EPOCH);
        Self::CACHE_CONTROL.modify_header(headers);
    }
}

impl Middleware for NoCache {
    fn name(&self) -> &'static str {
        "no_cache"
    }

    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let mut response = next.run(request).await;
            apply_defaults(response.headers_mut(), self);
            response
        })
    }
}

/// A directive of the `Clear-Site-Data` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearSiteDataDirective {
    /// Every kind of data.
    All,
    /// Locally cached data.
    Cache,
    /// Cookies.
    Cookies,
    /// DOM storage.
    Storage,
    /// Reload all browsing contexts.
    ExecutionContexts,
}

impl ClearSiteDataDirective {
    /// The directive as written in the header, without quotes.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "*",
            Self::Cache => "cache",
            Self::Cookies => "cookies",
            Self::Storage => "storage",
            Self::ExecutionContexts => "executionContexts",
        }
    }
}

/// The `Clear-Site-Data` response header.
pub const CLEAR_SITE_DATA: HeaderName = HeaderName::from_static("clear-site-data");

/// Sets the `Clear-Site-Data` header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClearSiteData(pub Vec<ClearSiteDataDirective>);

impl ClearSiteData {
    /// Clears every kind of data.
    pub fn all() -> Self {
        Self(vec![ClearSiteDataDirective::All])
    }
}

impl HeaderModifier for ClearSiteData {
    fn modify_header(&self, headers: &mut HeaderMap) {
        headers.remove(CLEAR_SITE_DATA);
        if self.0.is_empty() {
            return;
        }
        let value = self
            .0
            .iter()
            .map(|directive| format!("\"{}\"", directive.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        set_header(headers, CLEAR_SITE_DATA, &value);
    }
}

/// An `Authorization` request header value.
pub trait AuthScheme {
    /// The scheme name, e.g. `Basic`.
    fn scheme(&self) -> &'static str;

    /// The full header value.
    fn value(&self) -> String;
}

/// Basic credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl AuthScheme for BasicAuth {
    fn scheme(&self) -> &'static str {
        "Basic"
    }

    fn value(&self) -> String {
        let credentials = format!("{}:{}", self.username, self.password);
        format!("Basic {}", STANDARD.encode(credentials))
    }
}

/// A bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerAuth(pub String);

impl fmt::Debug for BearerAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BearerAuth(..)")
    }
}

impl AuthScheme for BearerAuth {
    fn scheme(&self) -> &'static str {
        "Bearer"
    }

    fn value(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

/// Sets the `Authorization` header to `auth`.
pub fn set_authorization(headers: &mut HeaderMap, auth: &dyn AuthScheme) {
    set_header(headers, header::AUTHORIZATION, &auth.value());
}

impl HeaderModifier for BasicAuth {
    fn modify_header(&self, headers: &mut HeaderMap) {
        set_authorization(headers, self);
    }
}

impl HeaderModifier for BearerAuth {
    fn modify_header(&self, headers: &mut HeaderMap) {
        set_authorization(headers, self);
    }
}

// Headers the handler already set win over the modifier's.
fn apply_defaults(headers: &mut HeaderMap, modifier: &dyn HeaderModifier) {
    let mut defaults = HeaderMap::new();
    modifier.modify_header(&mut defaults);

    let mut current = None;
    for (name, value) in defaults {
        if let Some(name) = name {
            current = (!headers.contains_key(&name)).then_some(name);
        }
        if let Some(name) = &current {
            headers.append(name.clone(), value);
        }
    }
}

/// Middleware applying a [`HeaderModifier`] to every response.
///
/// Headers set by the handler take precedence.
#[derive(Debug, Clone)]
pub struct WithHeader<M> {
    modifier: M,
}

impl<M: HeaderModifier> WithHeader<M> {
    /// Applies `modifier` to every response.
    pub fn new(modifier: M) -> Self {
        Self { modifier }
    }
}

impl<M: HeaderModifier> Middleware for WithHeader<M> {
    fn name(&self) -> &'static str {
        "with_header"
    }

    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let mut response = next.run(request).await;
            apply_defaults(response.headers_mut(), &self.modifier);
            response
        })
    }
}
