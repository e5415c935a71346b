//! Serving files from a directory.
//!
//! [`FileServer`] answers `GET` and `HEAD` requests with the contents of files
//! below a root directory:
//!
//! - `..` segments and paths escaping the root through symlinks are
//!   forbidden
//! - hidden files and directories (names starting with `.`) are forbidden
//!   unless enabled
//! - a directory is served through its `index.html`; a directory path
//!   without a trailing slash is redirected to one first
//! - `Content-Type` is derived from the file extension
//! - `Last-Modified` is sent and honored through `If-Modified-Since`

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use http_body_util::Full;
use serv_core::{BoxFuture, Handler, Request, Response, ResponseExt};
use serv_middleware::headers::set_last_modified;
use thiserror::Error;

/// Name of the file served for a directory.
pub const INDEX_FILE: &str = "index.html";

/// Reasons a file could not be served.
#[derive(Debug, Error)]
pub enum FileError {
    /// The file does not exist.
    #[error("file not found: {0}")]
    NotFound(String),

    /// The path may not be served.
    #[error("forbidden path: {0}")]
    Forbidden(String),

    /// Only `GET` and `HEAD` are served.
    #[error("method not allowed")]
    MethodNotAllowed,

    /// Reading the file failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FileError {
    /// The HTTP status answered for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn into_response(self) -> Response {
        let status = self.status_code();
        if let Self::Io(err) = &self {
            tracing::error!(error = %err, "failed to serve file");
        }
        let mut response = match status {
            StatusCode::NOT_FOUND => Response::not_found(),
            _ => Response::text(status, format!("{}\n", status.canonical_reason().unwrap_or_default())),
        };
        if status == StatusCode::METHOD_NOT_ALLOWED {
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
        }
        response
    }
}

#[derive(Debug)]
struct Settings {
    root: PathBuf,
    serve_hidden: bool,
}

/// A handler serving the files below a root directory.
///
/// ```rust
/// use serv::FileServer;
///
/// let files = FileServer::new("./public").serve_hidden(false);
/// assert_eq!(files.root(), std::path::Path::new("./public"));
/// ```
#[derive(Debug, Clone)]
pub struct FileServer {
    settings: Arc<Settings>,
}

impl FileServer {
    /// Serves the files below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            settings: Arc::new(Settings {
                root: root.into(),
                serve_hidden: false,
            }),
        }
    }

    /// Allows serving files and directories whose name starts with `.`.
    #[must_use]
    pub fn serve_hidden(self, enabled: bool) -> Self {
        Self {
            settings: Arc::new(Settings {
                root: self.settings.root.clone(),
                serve_hidden: enabled,
            }),
        }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.settings.root
    }

    /// Serves `request`, reporting why it could not be served.
    pub async fn serve(&self, request: &Request) -> Result<Response, FileError> {
        let method = request.method();
        if method != Method::GET && method != Method::HEAD {
            return Err(FileError::MethodNotAllowed);
        }

        let request_path = request.uri().path();
        let mut path = self.resolve(request_path).await?;
        let mut metadata = tokio::fs::metadata(&path).await?;

        if metadata.is_dir() {
            if !request_path.ends_with('/') {
                return Ok(redirect_to_dir(request));
            }
            path.push(INDEX_FILE);
            metadata = tokio::fs::metadata(&path)
                .await
                .map_err(|_| FileError::NotFound(request_path.to_string()))?;
            if !metadata.is_file() {
                return Err(FileError::NotFound(request_path.to_string()));
            }
        }

        let modified = metadata.modified().ok();
        if let Some(modified) = modified {
            if not_modified_since(request.headers(), modified) {
                let mut response = Response::empty(StatusCode::NOT_MODIFIED);
                set_last_modified(response.headers_mut(), modified);
                return Ok(response);
            }
        }

        let body = if method == Method::HEAD {
            Bytes::new()
        } else {
            Bytes::from(tokio::fs::read(&path).await?)
        };

        let mut response = http::Response::new(Full::new(body));
        let headers = response.headers_mut();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type(&path)));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(metadata.len()));
        if let Some(modified) = modified {
            set_last_modified(headers, modified);
        }
        Ok(response)
    }

    async fn resolve(&self, request_path: &str) -> Result<PathBuf, FileError> {
        let decoded = percent_decode(request_path)
            .ok_or_else(|| FileError::NotFound(request_path.to_string()))?;
        let relative = decoded.trim_start_matches('/');

        for component in Path::new(relative).components() {
            match component {
                Component::ParentDir => {
                    return Err(FileError::Forbidden(request_path.to_string()));
                }
                Component::Normal(name)
                    if !self.settings.serve_hidden
                        && name.to_str().is_some_and(|name| name.starts_with('.')) =>
                {
                    return Err(FileError::Forbidden(request_path.to_string()));
                }
                _ => {}
            }
        }

        let root = tokio::fs::canonicalize(&self.settings.root).await?;
        let path = tokio::fs::canonicalize(root.join(relative))
            .await
            .map_err(|_| FileError::NotFound(request_path.to_string()))?;
        if !path.starts_with(&root) {
            return Err(FileError::Forbidden(request_path.to_string()));
        }
        Ok(path)
    }
}

impl Handler for FileServer {
    fn call(&self, request: Request) -> BoxFuture<'static, Response> {
        let files = self.clone();
        Box::pin(async move {
            match files.serve(&request).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::debug!(path = request.uri().path(), error = %err, "not serving file");
                    err.into_response()
                }
            }
        })
    }
}

fn redirect_to_dir(request: &Request) -> Response {
    let location = match request.uri().query() {
        Some(query) => format!("{}/?{query}", request.uri().path()),
        None => format!("{}/", request.uri().path()),
    };
    let mut response = Response::empty(StatusCode::MOVED_PERMANENTLY);
    if let Ok(location) = HeaderValue::from_str(&location) {
        response.headers_mut().insert(header::LOCATION, location);
    }
    response
}

fn not_modified_since(headers: &HeaderMap, modified: SystemTime) -> bool {
    let Some(since) = headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| httpdate::parse_http_date(value).ok())
    else {
        return false;
    };
    // HTTP dates have a resolution of one second.
    let secs = |time: SystemTime| time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).ok();
    matches!((secs(modified), secs(since)), (Some(modified), Some(since)) if modified <= since)
}

/// Decodes `%XX` escapes. Fails on malformed escapes or invalid UTF-8.
fn percent_decode(input: &str) -> Option<String> {
    if !input.contains('%') {
        return Some(input.to_string());
    }
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// The `Content-Type` for `path`, by extension.
pub fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "txt" | "md" => "text/plain; charset=utf-8",
        "xml" => "text/xml; charset=utf-8",
        "csv" => "text/csv; charset=utf-8",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "pdf" => "application/pdf",
        "wasm" => "application/wasm",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type() {
        assert_eq!(content_type(Path::new("a/index.HTML")), "text/html; charset=utf-8");
        assert_eq!(content_type(Path::new("app.wasm")), "application/wasm");
        assert_eq!(content_type(Path::new("README")), "application/octet-stream");
    }

    #[test]
    fn test_percent_decode() {
        assert_eq!(percent_decode("/a%20b.txt").as_deref(), Some("/a b.txt"));
        assert_eq!(percent_decode("/%2e%2e/etc").as_deref(), Some("/../etc"));
        assert_eq!(percent_decode("/plain").as_deref(), Some("/plain"));
        assert_eq!(percent_decode("/bad%zz"), None);
        assert_eq!(percent_decode("/short%2"), None);
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(FileError::NotFound("/x".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(FileError::Forbidden("/..".into()).status_code(), StatusCode::FORBIDDEN);
        assert_eq!(FileError::MethodNotAllowed.status_code(), StatusCode::METHOD_NOT_ALLOWED);

        let response = FileError::MethodNotAllowed.into_response();
        assert_eq!(response.headers()[header::ALLOW], "GET, HEAD");
    }

    #[test]
    fn test_not_modified_since() {
        let modified = UNIX_EPOCH + std::time::Duration::from_secs(784_111_777);
        let mut headers = HeaderMap::new();
        assert!(!not_modified_since(&headers, modified));

        headers.insert(
            header::IF_MODIFIED_SINCE,
            HeaderValue::from_static("Sun, 06 Nov 1994 08:49:37 GMT"),
        );
        assert!(not_modified_since(&headers, modified));
        assert!(!not_modified_since(&headers, modified + std::time::Duration::from_secs(1)));
    }
}
