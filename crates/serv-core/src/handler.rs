//! The request handler abstraction.
//!
//! A [`Handler`] is the unit the server, the router and every middleware
//! operate on: it takes a request and produces a response.
//!
//! # Example
//!
//! ```
//! use serv_core::{handler_fn, Handler, Request, Response, ResponseExt};
//!
//! let hello = handler_fn(|_req: Request| async { Response::text(http::StatusCode::OK, "hello") });
//! # let _ = hello;
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::types::{BoxFuture, Request, Response, ResponseExt};

/// Processes a request into a response.
///
/// Handlers are invoked concurrently for every request on every connection,
/// so implementations must be safe to share between tasks.
pub trait Handler: Send + Sync + 'static {
    /// Handles `request` and returns the response future.
    fn call(&self, request: Request) -> BoxFuture<'static, Response>;
}

/// A shared, type-erased handler.
pub type SharedHandler = Arc<dyn Handler>;

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn call(&self, request: Request) -> BoxFuture<'static, Response> {
        (**self).call(request)
    }
}

impl<H: Handler + ?Sized> Handler for Box<H> {
    fn call(&self, request: Request) -> BoxFuture<'static, Response> {
        (**self).call(request)
    }
}

/// A handler created from an async function or closure.
#[derive(Clone)]
pub struct HandlerFn<F> {
    func: F,
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}

/// Wraps an async function into a [`Handler`].
pub fn handler_fn<F, Fut>(func: F) -> HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    HandlerFn { func }
}

impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, request: Request) -> BoxFuture<'static, Response> {
        Box::pin((self.func)(request))
    }
}

/// Replies to each request with an HTTP 204 "no content" response.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoContent;

impl Handler for NoContent {
    fn call(&self, _request: Request) -> BoxFuture<'static, Response> {
        Box::pin(async { Response::no_content() })
    }
}

/// Replies to each request with an HTTP 404 "not found" response.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFound;

impl Handler for NotFound {
    fn call(&self, _request: Request) -> BoxFuture<'static, Response> {
        Box::pin(async { Response::not_found() })
    }
}

/// Returns a shared [`NoContent`] handler.
pub fn no_content_handler() -> SharedHandler {
    Arc::new(NoContent)
}
