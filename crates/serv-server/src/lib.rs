//! # Serv Server
//!
//! A lifecycle-managed HTTP server.
//!
//! This crate wraps a hyper HTTP/1.1 accept loop with:
//!
//! - a state machine making start, graceful shutdown, forced close and
//!   restart safe from any task ([`Server`], [`State`])
//! - timeouts and size limits with safe defaults ([`Config`])
//! - port and address parsing ([`Port`])
//! - TLS via rustls with a modern default profile ([`tls`])
//! - a request router with named routes ([`router`])
//! - pluggable lifecycle logging ([`Logger`])
//!
//! ## Example
//!
//! ```rust,no_run
//! use serv_core::NoContent;
//! use serv_server::router::Route;
//! use serv_server::{Port, RouteHandler, Server};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), serv_server::ServerError> {
//!     let server = Server::builder()
//!         .port(Port::new(8080))
//!         .routes(|router: &mut dyn RouteHandler| {
//!             router.handle_route(Route::new("/health", NoContent).name("health"));
//!         })
//!         .build()?;
//!
//!     server.run().await
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/serv-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
mod error;
pub mod logger;
pub mod options;
pub mod port;
mod primitive;
pub mod router;
mod server;
pub mod shutdown;
mod state;
pub mod tls;

pub use config::{Config, ConfigBuilder, MIN_MAX_HEADER_BYTES};
pub use error::ServerError;
pub use logger::{DefaultLogger, ErrorLogger, ErrorLoggerProvider, Logger, NopLogger};
pub use options::{ConnState, ServerOption, Settings};
pub use port::{join_host_port, split_host_port, Port, PortParseError};
pub use router::{PathParams, Route, RouteHandler, RoutesRegisterer, ServeMux};
pub use server::{with_server_name, Server, ServerBuilder};
pub use state::{InvalidStateError, State, StateReason};
pub use tls::{TlsConfig, TlsError, TlsFiles};
