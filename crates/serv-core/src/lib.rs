//! # Serv Core
//!
//! Core types shared by the serv crates.
//!
//! - [`Handler`]: the unit of request processing
//! - [`Middleware`], [`Next`] and [`Chain`]: wrapping handlers with behavior
//! - [`RequestMeta`]: typed request-scoped metadata (server name, handler
//!   name, the "should ignore" flag, connection details)
//! - [`LineWriter`]: the sink text loggers write to

#![doc(html_root_url = "https://docs.rs/serv-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod handler;
pub mod meta;
pub mod middleware;
pub mod sink;
pub mod types;

pub use handler::{handler_fn, no_content_handler, Handler, HandlerFn, NoContent, NotFound, SharedHandler};
pub use meta::RequestMeta;
pub use middleware::{wrap, Chain, Middleware, Next, SharedMiddleware};
pub use sink::{IoWriter, LineWriter, MemoryWriter, TracingWriter};
pub use types::{body_len, BoxFuture, Request, Response, ResponseExt};
