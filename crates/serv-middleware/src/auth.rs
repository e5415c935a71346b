//! HTTP Basic authentication.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http::{header, HeaderValue, StatusCode};
use serv_core::{BoxFuture, Middleware, Next, Request, Response, ResponseExt};
use sha2::{Digest, Sha256};

/// Value of the `WWW-Authenticate` challenge sent with a 401 response.
pub const CHALLENGE: &str = "Basic charset=\"UTF-8\"";

type Sha256Digest = [u8; 32];

fn digest(value: &[u8]) -> Sha256Digest {
    Sha256::digest(value).into()
}

fn constant_time_eq(a: &Sha256Digest, b: &Sha256Digest) -> bool {
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Middleware requiring HTTP Basic credentials.
///
/// Only SHA-256 digests of the expected user and password are kept, and
/// submitted credentials are compared against them in constant time. A
/// missing or wrong `Authorization` header is answered with
/// `401 Unauthorized` and a `WWW-Authenticate: Basic charset="UTF-8"`
/// challenge.
///
/// An empty password disables the check and every request passes.
pub struct BasicAuth {
    user: Sha256Digest,
    pass: Sha256Digest,
    enabled: bool,
}

impl BasicAuth {
    /// Requires `user` and `pass`.
    pub fn new(user: &str, pass: &str) -> Self {
        Self {
            user: digest(user.as_bytes()),
            pass: digest(pass.as_bytes()),
            enabled: !pass.is_empty(),
        }
    }

    /// Whether credentials are checked.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Reports whether `request` carries the expected credentials.
    pub fn authorized(&self, request: &Request) -> bool {
        let Some((user, pass)) = basic_credentials(request) else {
            return false;
        };
        // Both comparisons always run.
        let user_ok = constant_time_eq(&self.user, &digest(user.as_bytes()));
        let pass_ok = constant_time_eq(&self.pass, &digest(pass.as_bytes()));
        user_ok & pass_ok
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Decodes the user and password of a Basic `Authorization` header.
pub fn basic_credentials(request: &Request) -> Option<(String, String)> {
    let value = request.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = String::from_utf8(STANDARD.decode(encoded.trim()).ok()?).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn unauthorized() -> Response {
    let mut response = Response::text(StatusCode::UNAUTHORIZED, "Unauthorized\n");
    response
        .headers_mut()
        .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(CHALLENGE));
    response
}

impl Middleware for BasicAuth {
    fn name(&self) -> &'static str {
        "basic_auth"
    }

    fn process<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            if !self.enabled || self.authorized(&request) {
                return next.run(request).await;
            }
            tracing::debug!(uri = %request.uri(), "rejecting request without valid credentials");
            unauthorized()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headers::{self, HeaderModifier};
    use bytes::Bytes;
    use http_body_util::Full;
    use serv_core::{Chain, Handler, NoContent};
    use std::sync::Arc;

    fn request(credentials: Option<(&str, &str)>) -> Request {
        let mut req = http::Request::new(Full::new(Bytes::new()));
        if let Some((username, password)) = credentials {
            headers::BasicAuth {
                username: username.into(),
                password: password.into(),
            }
            .modify_header(req.headers_mut());
        }
        req
    }

    fn guarded(user: &str, pass: &str) -> Chain {
        Chain::new(vec![Arc::new(BasicAuth::new(user, pass))], Arc::new(NoContent))
    }

    #[tokio::test]
    async fn test_valid_credentials_pass() {
        let response = guarded("admin", "secret")
            .call(request(Some(("admin", "secret"))))
            .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_invalid_credentials_are_challenged() {
        let chain = guarded("admin", "secret");
        for req in [
            request(None),
            request(Some(("admin", "wrong"))),
            request(Some(("root", "secret"))),
        ] {
            let response = chain.call(req).await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(response.headers()[header::WWW_AUTHENTICATE], CHALLENGE);
        }
    }

    #[tokio::test]
    async fn test_empty_password_disables_check() {
        assert!(!BasicAuth::new("admin", "").is_enabled());
        let response = guarded("admin", "").call(request(None)).await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn test_basic_credentials_parsing() {
        let mut req = request(None);
        req.headers_mut()
            .insert(header::AUTHORIZATION, HeaderValue::from_static("basic dTpwOnE="));
        assert_eq!(
            basic_credentials(&req),
            Some(("u".to_string(), "p:q".to_string()))
        );

        req.headers_mut()
            .insert(header::AUTHORIZATION, HeaderValue::from_static("Basic !!!"));
        assert_eq!(basic_credentials(&req), None);
    }
}
