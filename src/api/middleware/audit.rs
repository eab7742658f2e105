//! Access logging middleware.
//!
//! Logs every protected request with user_id, method, path, status and
//! latency. Runs innermost (after auth has injected the `Identity`).

use std::time::Instant;

use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::models::Identity;

pub async fn log_access(req: Request<axum::body::Body>, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let user_id = req
        .extensions()
        .get::<Identity>()
        .map(|identity| identity.user_id.clone())
        .unwrap_or_default();
    let started = Instant::now();

    let response = next.run(req).await;

    tracing::info!(
        user_id,
        %method,
        path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "API access"
    );

    response
}
