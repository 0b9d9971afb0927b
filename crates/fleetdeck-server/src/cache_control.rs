//! `Cache-Control` for GET responses
//!
//! Successful slow-changing reads may be cached briefly; everything else,
//! error responses included, is marked `no-cache`. A header set by the
//! handler itself is left alone.

use axum::extract::Request;
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;

/// Path prefix and max-age in seconds; first match wins
const CACHE_RULES: &[(&str, u32)] = &[
    ("/api/versions/available", 300),
    ("/api/infrastructure/status", 5),
    ("/api/cluster/resources", 10),
    ("/api/snapshots", 10),
];

pub fn cache_policy(path: &str, status: StatusCode) -> String {
    if !status.is_success() {
        return "no-cache".to_string();
    }
    CACHE_RULES
        .iter()
        .find(|(prefix, _)| path.starts_with(prefix))
        .map(|(_, max_age)| format!("public, max-age={}", max_age))
        .unwrap_or_else(|| "no-cache".to_string())
}

pub async fn cache_control(request: Request, next: Next) -> Response {
    let path = (request.method() == Method::GET).then(|| request.uri().path().to_string());
    let mut response = next.run(request).await;

    if let Some(path) = path
        && !response.headers().contains_key(header::CACHE_CONTROL)
        && let Ok(value) = HeaderValue::from_str(&cache_policy(&path, response.status()))
    {
        response.headers_mut().insert(header::CACHE_CONTROL, value);
    }
    response
}
