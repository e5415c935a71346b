//! # Serv Middleware
//!
//! Middleware for serv handlers:
//!
//! | Middleware                                 | Purpose |
//! |--------------------------------------------|---------|
//! | [`AccessLog`](access_log::AccessLog)       | One log line per request, in generic or common log format |
//! | [`Collector`](metrics::Collector)          | Request count, duration and response size metrics |
//! | [`Cors`](cors::Cors)                       | `Access-Control-*` response headers and preflight answers |
//! | [`WithHeader`](headers::WithHeader)        | Default response headers from any [`HeaderModifier`] |
//! | [`NoCache`](headers::NoCache)              | Marks responses as not cacheable |
//! | [`BasicAuth`](auth::BasicAuth)             | HTTP Basic authentication |
//! | [`RedirectHttps`](redirect::RedirectHttps) | Upgrades plain-text requests to `https` |
//! | [`RemoveTrailingSlash`](redirect::RemoveTrailingSlash) | Canonicalizes paths |
//!
//! Access loggers and metrics recorders can be limited to a class of response
//! statuses with [`LimitCodes`].
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use serv_core::{wrap, NoContent, SharedMiddleware};
//! use serv_middleware::{AccessLog, ClfFormat, LimitCodes, NoCache, ResponseStatus};
//!
//! let middleware: Vec<SharedMiddleware> = vec![
//!     Arc::new(AccessLog::new(LimitCodes::new(ResponseStatus::ERRORS, ClfFormat::new()))),
//!     Arc::new(NoCache),
//! ];
//! let handler = wrap(Arc::new(NoContent), middleware);
//! # let _ = handler;
//! ```

#![doc(html_root_url = "https://docs.rs/serv-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod access_log;
pub mod auth;
pub mod cors;
pub mod headers;
pub mod metrics;
pub mod redirect;
pub mod status;

pub use access_log::{
    set_should_ignore, should_ignore, AccessLog, AccessLogger, ClfFormat, Details, GenericFormat,
    IgnoreHandler, NopAccessLogger, RequestInfo,
};
pub use auth::BasicAuth;
pub use cors::{AccessControl, Cors};
pub use headers::{no_cache, CacheControl, ClearSiteData, HeaderModifier, NoCache, WithHeader};
pub use self::metrics::{Collector, FacadeRecorder, Metrics, Recorder};
pub use redirect::{RedirectHttps, RemoveTrailingSlash};
pub use status::{LimitCodes, ResponseStatus};
