//! Middleware trait and chain composition.
//!
//! Middleware wraps a [`Handler`] to add behavior around it. A [`Chain`]
//! composes an ordered list of middleware with a final handler into a new
//! handler; the first middleware in the list is the outermost one, so it sees
//! the request first and the response last.
//!
//! # Example
//!
//! ```
//! use serv_core::{BoxFuture, Chain, Middleware, Next, NoContent, Request, Response};
//! use std::sync::Arc;
//!
//! struct Timing;
//!
//! impl Middleware for Timing {
//!     fn name(&self) -> &'static str {
//!         "timing"
//!     }
//!
//!     fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Response> {
//!         Box::pin(async move {
//!             let start = std::time::Instant::now();
//!             let response = next.run(request).await;
//!             tracing::debug!(elapsed = ?start.elapsed(), "request finished");
//!             response
//!         })
//!     }
//! }
//!
//! let handler = Chain::new(vec![Arc::new(Timing)], Arc::new(NoContent));
//! # let _ = handler;
//! ```

use std::fmt;
use std::sync::Arc;

use crate::handler::{Handler, SharedHandler};
use crate::types::{BoxFuture, Request, Response};

/// Adds behavior around a handler.
///
/// # Invariants
///
/// - Middleware calls `next.run()` at most once; not calling it short-circuits
///   the chain with the middleware's own response.
/// - Middleware may be invoked concurrently and must not rely on exclusive
///   access to its own state.
pub trait Middleware: Send + Sync + 'static {
    /// Returns the name of this middleware, used in diagnostics.
    fn name(&self) -> &'static str;

    /// Processes `request`, optionally delegating to `next`.
    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Response>;
}

/// A shared, type-erased middleware.
pub type SharedMiddleware = Arc<dyn Middleware>;

impl<M: Middleware + ?Sized> Middleware for Arc<M> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Response> {
        (**self).process(request, next)
    }
}

/// The remainder of a middleware chain.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

enum NextInner<'a> {
    Chain {
        middleware: &'a dyn Middleware,
        next: Box<Next<'a>>,
    },
    Handler(&'a dyn Handler),
}

impl<'a> Next<'a> {
    /// Builds the chain for `middleware` ending in `handler`.
    pub fn new(middleware: &'a [SharedMiddleware], handler: &'a dyn Handler) -> Self {
        middleware
            .iter()
            .rev()
            .fold(Self::handler(handler), |next, middleware| Self {
                inner: NextInner::Chain {
                    middleware: middleware.as_ref(),
                    next: Box::new(next),
                },
            })
    }

    /// Creates a terminal `Next` that invokes `handler`.
    pub fn handler(handler: &'a dyn Handler) -> Self {
        Self {
            inner: NextInner::Handler(handler),
        }
    }

    /// Invokes the next middleware or the final handler.
    ///
    /// This consumes `self` so the rest of the chain runs at most once.
    pub async fn run(self, request: Request) -> Response {
        match self.inner {
            NextInner::Chain { middleware, next } => middleware.process(request, *next).await,
            NextInner::Handler(handler) => handler.call(request).await,
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            NextInner::Chain { middleware, .. } => f
                .debug_struct("Next")
                .field("middleware", &middleware.name())
                .finish_non_exhaustive(),
            NextInner::Handler(_) => f.write_str("Next(handler)"),
        }
    }
}

struct ChainInner {
    middleware: Vec<SharedMiddleware>,
    handler: SharedHandler,
}

/// A handler that runs a list of middleware around a final handler.
#[derive(Clone)]
pub struct Chain {
    inner: Arc<ChainInner>,
}

impl Chain {
    /// Wraps `handler` with `middleware`; the first entry is the outermost.
    pub fn new(middleware: Vec<SharedMiddleware>, handler: SharedHandler) -> Self {
        Self {
            inner: Arc::new(ChainInner {
                middleware,
                handler,
            }),
        }
    }

    /// Names of the middleware in this chain, outermost first.
    pub fn names(&self) -> Vec<&'static str> {
        self.inner.middleware.iter().map(|m| m.name()).collect()
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("middleware", &self.names())
            .finish_non_exhaustive()
    }
}

impl Handler for Chain {
    fn call(&self, request: Request) -> BoxFuture<'static, Response> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            Next::new(&inner.middleware, inner.handler.as_ref())
                .run(request)
                .await
        })
    }
}

/// Wraps `handler` with `middleware`, returning `handler` unchanged when the
/// list is empty.
pub fn wrap(handler: SharedHandler, middleware: Vec<SharedMiddleware>) -> SharedHandler {
    if middleware.is_empty() {
        return handler;
    }
    Arc::new(Chain::new(middleware, handler))
}
