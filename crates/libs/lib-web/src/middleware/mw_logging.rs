//! # Request/Response Logging Middleware
//!
//! Logs every HTTP request and response with the request ID from
//! [`mw_req_stamp`](super::mw_req_stamp), method, path, status, and latency.
//! Headers that may carry credentials are never logged.

use axum::{
    extract::Request,
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use tracing::{info, warn};

/// Headers that should not be logged.
const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "x-api-key"];

/// Request/response logging middleware.
pub async fn log_requests(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(|q| q.to_string());

    let request_id = req
        .extensions()
        .get::<super::mw_req_stamp::RequestStamp>()
        .map(|s| s.id.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .map(|(name, value)| {
            let name_str = name.as_str().to_lowercase();
            let value_str = if SENSITIVE_HEADERS.contains(&name_str.as_str()) {
                "<redacted>".to_string()
            } else {
                value.to_str().unwrap_or("<binary>").to_string()
            };
            (name_str, value_str)
        })
        .collect();

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        query = ?query,
        headers = ?headers,
        "[REQUEST] {} {}",
        method,
        path
    );

    let response = next.run(req).await;

    let status = response.status();
    let latency = start.elapsed();

    if status.is_client_error() || status.is_server_error() {
        warn!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = %status,
            latency_ms = latency.as_millis(),
            "[RESPONSE] {} {} -> {} ({}ms)",
            method,
            path,
            status,
            latency.as_millis()
        );
    } else {
        info!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = %status,
            latency_ms = latency.as_millis(),
            "[RESPONSE] {} {} -> {} ({}ms)",
            method,
            path,
            status,
            latency.as_millis()
        );
    }

    response
}
