//! Request-scoped metadata.
//!
//! [`RequestMeta`] is the single typed bag that travels with a request in its
//! extensions. It carries the server name, the handler name set by a named
//! route, the "should ignore" flag used by access logging, and connection
//! details filled in by the server.
//!
//! The bag is a shared handle: middleware that clones it before calling the
//! next handler observes everything inner handlers set on it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::Request;

#[derive(Debug, Default)]
struct MetaInner {
    remote_addr: Option<SocketAddr>,
    secure: bool,
    server_name: RwLock<Option<Arc<str>>>,
    handler_name: RwLock<Option<Arc<str>>>,
    ignore: AtomicBool,
}

/// Shared, request-scoped metadata.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    inner: Arc<MetaInner>,
}

impl RequestMeta {
    /// Creates metadata for a request received on a connection from
    /// `remote_addr`. `secure` reports whether the connection uses TLS.
    pub fn new(remote_addr: Option<SocketAddr>, secure: bool) -> Self {
        Self {
            inner: Arc::new(MetaInner {
                remote_addr,
                secure,
                ..MetaInner::default()
            }),
        }
    }

    /// Returns the metadata attached to `request`, if any.
    pub fn of(request: &Request) -> Option<&Self> {
        request.extensions().get::<Self>()
    }

    /// Returns the metadata attached to `request`, attaching an empty bag
    /// first when there is none.
    pub fn ensure(request: &mut Request) -> Self {
        if let Some(meta) = request.extensions().get::<Self>() {
            return meta.clone();
        }
        let meta = Self::default();
        request.extensions_mut().insert(meta.clone());
        meta
    }

    /// The address of the remote peer.
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    /// Whether the request arrived over TLS.
    pub fn is_secure(&self) -> bool {
        self.inner.secure
    }

    /// The name of the server that accepted the request.
    pub fn server_name(&self) -> Option<Arc<str>> {
        self.inner.server_name.read().clone()
    }

    /// Sets the server name. Empty names are ignored.
    pub fn set_server_name(&self, name: &str) {
        if !name.is_empty() {
            *self.inner.server_name.write() = Some(Arc::from(name));
        }
    }

    /// The name of the route handler that served the request.
    pub fn handler_name(&self) -> Option<Arc<str>> {
        self.inner.handler_name.read().clone()
    }

    /// Sets the handler name. Empty names are ignored.
    pub fn set_handler_name(&self, name: &str) {
        if !name.is_empty() {
            *self.inner.handler_name.write() = Some(Arc::from(name));
        }
    }

    /// Whether logging and metrics should skip this request.
    pub fn should_ignore(&self) -> bool {
        self.inner.ignore.load(Ordering::Acquire)
    }

    /// Marks whether logging and metrics should skip this request.
    pub fn set_should_ignore(&self, ignore: bool) {
        self.inner.ignore.store(ignore, Ordering::Release);
    }
}

/// Returns the server name of `request`, or an empty string.
pub fn server_name(request: &Request) -> String {
    RequestMeta::of(request)
        .and_then(RequestMeta::server_name)
        .map(|name| name.to_string())
        .unwrap_or_default()
}

/// Returns the handler name of `request`, or an empty string.
pub fn handler_name(request: &Request) -> String {
    RequestMeta::of(request)
        .and_then(RequestMeta::handler_name)
        .map(|name| name.to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::Full;

    fn request() -> Request {
        http::Request::new(Full::new(Bytes::new()))
    }

    #[test]
    fn test_ensure_inserts_once() {
        let mut req = request();
        assert!(RequestMeta::of(&req).is_none());

        let first = RequestMeta::ensure(&mut req);
        first.set_handler_name("index");

        let second = RequestMeta::ensure(&mut req);
        assert_eq!(second.handler_name().as_deref(), Some("index"));
    }

    #[test]
    fn test_clone_shares_state() {
        let meta = RequestMeta::new(Some("127.0.0.1:9000".parse().unwrap()), true);
        let outer = meta.clone();
        meta.set_server_name("api");
        meta.set_should_ignore(true);

        assert_eq!(outer.server_name().as_deref(), Some("api"));
        assert!(outer.should_ignore());
        assert!(outer.is_secure());
        assert_eq!(outer.remote_addr().unwrap().port(), 9000);
    }

    #[test]
    fn test_empty_names_are_ignored() {
        let meta = RequestMeta::default();
        meta.set_server_name("");
        meta.set_handler_name("");
        assert!(meta.server_name().is_none());
        assert!(meta.handler_name().is_none());
    }

    #[test]
    fn test_name_helpers_without_meta() {
        let req = request();
        assert_eq!(server_name(&req), "");
        assert_eq!(handler_name(&req), "");
    }
}
