//! Routes and the request multiplexer.
//!
//! A [`Route`] binds an optional method and a path pattern to a handler and
//! optionally names it. Named routes record their name in the request's
//! [`RequestMeta`] so access logs and metrics can report which handler ran.
//!
//! [`ServeMux`] dispatches requests to registered routes. Patterns support:
//!
//! | Pattern              | Matches                                    |
//! |----------------------|--------------------------------------------|
//! | `/health`            | exactly `/health`                          |
//! | `/static/`           | `/static/` and everything below it         |
//! | `/users/{id}`        | one non-empty segment, captured as `id`    |
//! | `/files/{path...}`   | the remainder of the path, captured        |
//! | `/{$}`               | only `/`                                   |
//!
//! When several patterns match, the most specific one wins: more literal
//! segments first, then more parameters, then exact patterns over
//! wildcards and subtrees.
//!
//! # Example
//!
//! ```rust
//! use serv_server::router::{Route, RouteHandler, ServeMux};
//! use serv_core::NoContent;
//! use http::Method;
//!
//! let mut mux = ServeMux::new();
//! mux.handle_route(Route::new("/health", NoContent).method(Method::GET).name("health"));
//! assert_eq!(mux.len(), 1);
//! ```

use std::fmt;
use std::sync::Arc;

use http::{header, HeaderValue, Method, StatusCode};
use serv_core::{BoxFuture, Handler, NotFound, Request, RequestMeta, Response, ResponseExt, SharedHandler};
use thiserror::Error;

/// Errors produced when registering a route.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    /// The pattern cannot be parsed.
    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern {
        /// The rejected pattern.
        pattern: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A route with the same method and pattern already exists.
    #[error("route `{0}` is already registered")]
    Conflict(String),
}

/// A (method, pattern) binding to a handler, optionally named.
#[derive(Clone)]
pub struct Route {
    /// Name recorded in the request metadata; empty for anonymous routes.
    pub name: String,
    /// Method to match; `None` matches every method.
    pub method: Option<Method>,
    /// Path pattern.
    pub pattern: String,
    /// The handler serving matched requests.
    pub handler: SharedHandler,
}

impl Route {
    /// Creates an anonymous route matching every method.
    pub fn new(pattern: impl Into<String>, handler: impl Handler) -> Self {
        Self::shared(pattern, Arc::new(handler))
    }

    /// Creates an anonymous route from a shared handler.
    pub fn shared(pattern: impl Into<String>, handler: SharedHandler) -> Self {
        Self {
            name: String::new(),
            method: None,
            pattern: pattern.into(),
            handler,
        }
    }

    /// Sets the route name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Restricts the route to `method`.
    #[must_use]
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Returns `METHOD pattern`, or just the pattern when the route matches
    /// every method.
    pub fn key(&self) -> String {
        match &self.method {
            Some(method) => format!("{method} {}", self.pattern),
            None => self.pattern.clone(),
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("method", &self.method)
            .field("pattern", &self.pattern)
            .finish_non_exhaustive()
    }
}

impl Handler for Route {
    fn call(&self, mut request: Request) -> BoxFuture<'static, Response> {
        if !self.name.is_empty() {
            RequestMeta::ensure(&mut request).set_handler_name(&self.name);
        }
        self.handler.call(request)
    }
}

/// Something routes can be registered on.
pub trait RouteHandler {
    /// Registers `route`.
    fn handle_route(&mut self, route: Route);
}

/// Registers a batch of routes on any [`RouteHandler`].
///
/// Modules owning routes implement this so they can be mounted without the
/// server knowing their concrete route types.
pub trait RoutesRegisterer: Send + Sync {
    /// Registers all routes on `router`.
    fn register_routes(&self, router: &mut dyn RouteHandler);
}

impl<F> RoutesRegisterer for F
where
    F: Fn(&mut dyn RouteHandler) + Send + Sync,
{
    fn register_routes(&self, router: &mut dyn RouteHandler) {
        self(router);
    }
}

/// Path parameters captured by the matched pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(Vec<(String, String)>);

impl PathParams {
    /// Returns the value captured for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Iterates over all captured parameters.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the parameters captured for `request`, if it was routed.
    pub fn of(request: &Request) -> Option<&Self> {
        request.extensions().get::<Self>()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
    Rest(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Tail {
    // ordered from most to least specific
    Exact,
    Rest,
    Subtree,
}

#[derive(Debug, Clone)]
struct Pattern {
    segments: Vec<Segment>,
    tail: Tail,
}

impl Pattern {
    fn parse(pattern: &str) -> Result<Self, RouteError> {
        let invalid = |reason| RouteError::InvalidPattern {
            pattern: pattern.to_string(),
            reason,
        };

        let body = pattern
            .strip_prefix('/')
            .ok_or_else(|| invalid("must start with '/'"))?;
        let mut parts: Vec<&str> = body.split('/').collect();

        let mut tail = Tail::Exact;
        match parts.last().copied() {
            Some("") => {
                parts.pop();
                tail = Tail::Subtree;
            }
            Some("{$}") => {
                parts.pop();
                // "/a/{$}" matches "/a/" only
                if !parts.is_empty() {
                    parts.push("");
                }
            }
            _ => {}
        }

        let count = parts.len();
        let mut segments = Vec::with_capacity(count);
        for (i, part) in parts.into_iter().enumerate() {
            let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some(inner) => {
                    if let Some(name) = inner.strip_suffix("...") {
                        if i + 1 != count {
                            return Err(invalid("'...' wildcard must be the last segment"));
                        }
                        tail = Tail::Rest;
                        Segment::Rest(name.to_string())
                    } else if inner.is_empty() || inner == "$" {
                        return Err(invalid("empty or misplaced wildcard"));
                    } else {
                        Segment::Param(inner.to_string())
                    }
                }
                None if part.contains('{') || part.contains('}') => {
                    return Err(invalid("wildcards must span a whole segment"));
                }
                None if part.is_empty() && i + 1 != count => {
                    return Err(invalid("empty segment"));
                }
                None => Segment::Literal(part.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self { segments, tail })
    }

    fn matches(&self, path: &str) -> Option<Vec<(String, String)>> {
        let parts: Vec<&str> = path.strip_prefix('/').unwrap_or(path).split('/').collect();
        let mut params = Vec::new();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(literal) => {
                    if parts.get(i) != Some(&literal.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => match parts.get(i) {
                    Some(value) if !value.is_empty() => {
                        params.push((name.clone(), (*value).to_string()));
                    }
                    _ => return None,
                },
                Segment::Rest(name) => {
                    let rest = parts.get(i..).map(|p| p.join("/")).unwrap_or_default();
                    params.push((name.clone(), rest));
                    return Some(params);
                }
            }
        }

        let remaining = parts.get(self.segments.len()..).unwrap_or_default();
        let matched = match self.tail {
            Tail::Subtree => true,
            _ => remaining.is_empty() || (self.segments.is_empty() && remaining == [""]),
        };
        matched.then_some(params)
    }

    fn rank(&self) -> (usize, usize, std::cmp::Reverse<Tail>) {
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();
        let params = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Param(_)))
            .count();
        (literals, params, std::cmp::Reverse(self.tail))
    }
}

#[derive(Clone)]
struct Entry {
    pattern: Pattern,
    route: Route,
}

impl Entry {
    fn allows(&self, method: &Method) -> bool {
        match &self.route.method {
            None => true,
            Some(m) if m == method => true,
            Some(m) => *m == Method::GET && *method == Method::HEAD,
        }
    }
}

/// A request multiplexer dispatching to registered [`Route`]s.
#[derive(Clone)]
pub struct ServeMux {
    entries: Vec<Entry>,
    not_found: SharedHandler,
}

impl Default for ServeMux {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServeMux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServeMux")
            .field(
                "routes",
                &self.entries.iter().map(|e| e.route.key()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl ServeMux {
    /// Creates an empty mux answering unmatched requests with 404.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            not_found: Arc::new(NotFound),
        }
    }

    /// Sets the handler for unmatched requests.
    #[must_use]
    pub fn with_not_found(mut self, handler: impl Handler) -> Self {
        self.not_found = Arc::new(handler);
        self
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Reports whether no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registers `route`, rejecting invalid or duplicate patterns.
    pub fn try_handle_route(&mut self, route: Route) -> Result<(), RouteError> {
        let pattern = Pattern::parse(&route.pattern)?;
        let key = route.key();
        if self.entries.iter().any(|e| e.route.key() == key) {
            return Err(RouteError::Conflict(key));
        }

        tracing::debug!(route = %key, name = %route.name, "registered route");
        self.entries.push(Entry { pattern, route });
        Ok(())
    }

    /// Registers `handler` for `method` and `pattern`.
    pub fn handle(&mut self, method: Method, pattern: impl Into<String>, handler: impl Handler) {
        self.handle_route(Route::new(pattern, handler).method(method));
    }

    /// Registers every route of `registerer`.
    pub fn register(&mut self, registerer: &dyn RoutesRegisterer) {
        registerer.register_routes(self);
    }

    /// Registers every route of `registerer`, returning the routes that
    /// were rejected instead of panicking. Accepted routes stay registered.
    pub fn try_register(&mut self, registerer: &dyn RoutesRegisterer) -> Result<(), Vec<RouteError>> {
        let mut collector = Collecting {
            mux: self,
            errors: Vec::new(),
        };
        registerer.register_routes(&mut collector);
        if collector.errors.is_empty() {
            Ok(())
        } else {
            Err(collector.errors)
        }
    }

    fn dispatch(&self, request: &Request) -> Dispatch<'_> {
        let path = request.uri().path();
        let mut best: Option<(&Entry, Vec<(String, String)>)> = None;
        let mut allowed: Vec<&Method> = Vec::new();
        let mut any_path_match = false;

        for entry in &self.entries {
            let Some(params) = entry.pattern.matches(path) else {
                continue;
            };
            any_path_match = true;
            if !entry.allows(request.method()) {
                if let Some(method) = &entry.route.method {
                    allowed.push(method);
                }
                continue;
            }
            let better = best
                .as_ref()
                .map_or(true, |(current, _)| entry.pattern.rank() > current.pattern.rank());
            if better {
                best = Some((entry, params));
            }
        }

        match best {
            Some((entry, params)) => Dispatch::Route(&entry.route, PathParams(params)),
            None if any_path_match && !allowed.is_empty() => Dispatch::MethodNotAllowed(allowed),
            None => Dispatch::NotFound,
        }
    }
}

// Registers on a mux, keeping failures for the caller.
struct Collecting<'a> {
    mux: &'a mut ServeMux,
    errors: Vec<RouteError>,
}

impl RouteHandler for Collecting<'_> {
    fn handle_route(&mut self, route: Route) {
        if let Err(err) = self.mux.try_handle_route(route) {
            self.errors.push(err);
        }
    }
}

enum Dispatch<'a> {
    Route(&'a Route, PathParams),
    MethodNotAllowed(Vec<&'a Method>),
    NotFound,
}

impl RouteHandler for ServeMux {
    /// Registers `route`.
    ///
    /// # Panics
    ///
    /// Panics when the pattern is invalid or already registered, which is a
    /// programming error. Use [`ServeMux::try_handle_route`] to handle these
    /// cases.
    fn handle_route(&mut self, route: Route) {
        if let Err(err) = self.try_handle_route(route) {
            panic!("{err}");
        }
    }
}

impl Handler for ServeMux {
    fn call(&self, mut request: Request) -> BoxFuture<'static, Response> {
        match self.dispatch(&request) {
            Dispatch::Route(route, params) => {
                let route = route.clone();
                request.extensions_mut().insert(params);
                route.call(request)
            }
            Dispatch::MethodNotAllowed(methods) => {
                let mut allow: Vec<&str> = methods.iter().map(|m| m.as_str()).collect();
                allow.sort_unstable();
                allow.dedup();
                let allow = allow.join(", ");
                Box::pin(async move {
                    let mut response =
                        Response::text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n");
                    if let Ok(value) = HeaderValue::from_str(&allow) {
                        response.headers_mut().insert(header::ALLOW, value);
                    }
                    response
                })
            }
            Dispatch::NotFound => self.not_found.call(request),
        }
    }
}
