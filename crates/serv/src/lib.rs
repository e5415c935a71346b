//! # Serv
//!
//! An HTTP server toolkit built on hyper and tokio.
//!
//! This facade re-exports the serv crates:
//!
//! | Module         | Crate             | Contents |
//! |----------------|-------------------|----------|
//! | [`core`]       | `serv-core`       | `Handler`, `Middleware`, `RequestMeta`, line writers |
//! | [`server`]     | `serv-server`     | `Server` state machine, `Config`, `Port`, TLS, router |
//! | [`middleware`] | `serv-middleware` | access log, metrics, CORS, headers, auth, redirects |
//! | [`config`]     | `serv-config`     | layered file and environment configuration |
//! | [`telemetry`]  | `serv-telemetry`  | `tracing-subscriber` and metrics setup |
//!
//! It also provides [`FileServer`], the handler behind the `serv` binary.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use serv::middleware::{AccessLog, ClfFormat};
//! use serv::server::{DefaultLogger, Port, Server};
//! use serv::FileServer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), serv::server::ServerError> {
//!     let server = Arc::new(
//!         Server::builder()
//!             .name("files")
//!             .port(Port::new(8080))
//!             .logger(Arc::new(DefaultLogger::new()))
//!             .middleware(AccessLog::new(ClfFormat::new()))
//!             .handler(FileServer::new("./public"))
//!             .build()?,
//!     );
//!
//!     let running = tokio::spawn({
//!         let server = Arc::clone(&server);
//!         async move { server.run().await }
//!     });
//!
//!     let _ = serv::server::shutdown::os_signal().await;
//!     server.shutdown(Some(Duration::from_secs(3))).await?;
//!     let _ = running.await;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/serv/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod files;

pub use files::{FileError, FileServer};

pub use serv_config as config;
pub use serv_core as core;
pub use serv_middleware as middleware;
pub use serv_server as server;
pub use serv_telemetry as telemetry;

pub use serv_core::{Handler, Middleware, Request, Response};
pub use serv_server::{Config, Port, Server, ServerError, State};
