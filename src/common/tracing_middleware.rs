//! Request tracing middleware
//!
//! Every request gets an `X-Request-ID` (taken from the client or generated),
//! a tracing span carrying it, a completion log line and a sample in the
//! per-route metrics.

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderValue, Request, Response},
    middleware::Next,
};
use std::time::Instant;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::common::METRICS;

/// Header name for request ID
pub const REQUEST_ID_HEADER: &str = "X-Request-ID";

/// Generate a new unique request ID
pub fn generate_request_id() -> String {
    Uuid::new_v4().to_string()
}

pub async fn request_tracing_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let start = Instant::now();

    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(generate_request_id);

    let method = request.method().clone();
    // Label metrics by route template so file keys don't explode cardinality
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());

    let span = tracing::info_span!(
        "http_request",
        request_id = %request_id,
        method = %method,
        route = %route,
    );

    let mut response = next.run(request).instrument(span.clone()).await;

    let duration = start.elapsed();
    let status = response.status();

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }

    METRICS.record_request(&route, duration, !status.is_server_error());

    span.in_scope(|| {
        if status.is_success() {
            info!(
                status = status.as_u16(),
                duration_ms = duration.as_millis() as u64,
                "Request completed"
            );
        } else {
            warn!(
                status = status.as_u16(),
                duration_ms = duration.as_millis() as u64,
                "Request failed"
            );
        }
    });

    response
}
