use std::fs;

use bytes::Bytes;
use http::{header, Method, StatusCode};
use http_body_util::{BodyExt, Full};
use serv::{FileServer, Handler, Request, Response};

fn request(method: Method, uri: &str) -> Request {
    http::Request::builder()
        .method(method)
        .uri(uri)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

async fn body(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn site() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
    fs::write(dir.path().join("style.css"), "body{}").unwrap();
    fs::write(dir.path().join(".env"), "SECRET=1").unwrap();
    fs::create_dir(dir.path().join("docs")).unwrap();
    fs::write(dir.path().join("docs").join("index.html"), "docs").unwrap();
    fs::create_dir(dir.path().join("empty")).unwrap();
    fs::write(dir.path().join("with space.txt"), "spaced").unwrap();
    dir
}

#[tokio::test]
async fn test_serves_files_with_headers() {
    let dir = site();
    let files = FileServer::new(dir.path());

    let response = files.call(request(Method::GET, "/style.css")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/css; charset=utf-8");
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "6");
    assert!(response.headers().contains_key(header::LAST_MODIFIED));
    assert_eq!(body(response).await, "body{}");

    let response = files.call(request(Method::GET, "/with%20space.txt")).await;
    assert_eq!(body(response).await, "spaced");
}

#[tokio::test]
async fn test_head_has_no_body() {
    let dir = site();
    let response = FileServer::new(dir.path())
        .call(request(Method::HEAD, "/style.css"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "6");
    assert_eq!(body(response).await, "");
}

#[tokio::test]
async fn test_directories_use_index() {
    let dir = site();
    let files = FileServer::new(dir.path());

    let response = files.call(request(Method::GET, "/")).await;
    assert_eq!(body(response).await, "<h1>home</h1>");

    let response = files.call(request(Method::GET, "/docs?v=1")).await;
    assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
    assert_eq!(response.headers()[header::LOCATION], "/docs/?v=1");

    let response = files.call(request(Method::GET, "/docs/")).await;
    assert_eq!(body(response).await, "docs");

    let response = files.call(request(Method::GET, "/empty/")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rejected_requests() {
    let dir = site();
    let files = FileServer::new(dir.path());

    let response = files.call(request(Method::GET, "/missing.txt")).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = files.call(request(Method::GET, "/%2e%2e/etc/passwd")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = files.call(request(Method::GET, "/.env")).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = files.call(request(Method::POST, "/style.css")).await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers()[header::ALLOW], "GET, HEAD");
}

#[tokio::test]
async fn test_hidden_files_when_enabled() {
    let dir = site();
    let response = FileServer::new(dir.path())
        .serve_hidden(true)
        .call(request(Method::GET, "/.env"))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_if_modified_since() {
    let dir = site();
    let files = FileServer::new(dir.path());

    let response = files.call(request(Method::GET, "/style.css")).await;
    let last_modified = response.headers()[header::LAST_MODIFIED].clone();

    let mut conditional = request(Method::GET, "/style.css");
    conditional
        .headers_mut()
        .insert(header::IF_MODIFIED_SINCE, last_modified);
    let response = files.call(conditional).await;
    assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
}
