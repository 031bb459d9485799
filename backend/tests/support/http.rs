//! Requests against the in-process router.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceExt;

use hydro_sentinel::config::Settings;
use hydro_sentinel::db::repositories::LocalRepository;
use hydro_sentinel::db::repository::FullRepository;
use hydro_sentinel::http::{create_router, AppState};

pub const PREFIX: &str = "/api/v1";
const BOUNDARY: &str = "hydro-sentinel-test-boundary";

pub fn app(repo: Arc<LocalRepository>) -> Router {
    let repo: Arc<dyn FullRepository> = repo;
    create_router(AppState::new(repo, Settings::default()))
}

pub fn get(path: &str) -> Request<Body> {
    Request::builder()
        .uri(format!("{}{}", PREFIX, path))
        .body(Body::empty())
        .unwrap()
}

pub fn json_request(method: &str, path: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(format!("{}{}", PREFIX, path))
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

/// Multipart POST with text `fields` and one `file` part.
pub fn multipart_request(
    path: &str,
    fields: &[(&str, &str)],
    filename: &str,
    content: &[u8],
) -> Request<Body> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n",
            BOUNDARY, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());

    Request::builder()
        .method("POST")
        .uri(format!("{}{}", PREFIX, path))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

/// Status, headers and raw body of one request.
pub async fn send_raw(
    app: &Router,
    request: Request<Body>,
) -> (StatusCode, axum::http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, bytes.to_vec())
}

/// Status and JSON body of one request (`Null` for an empty body).
pub async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let (status, _, body) = send_raw(app, request).await;
    let json = if body.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}
