//! API router.
//!
//! Protected stack (outermost → innermost):
//! Extension(ApiContext) → Auth validator → Audit logger → Handler

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api::endpoints;
use crate::api::middleware;
use crate::api::types::ApiContext;
use crate::core_state::CoreState;

/// Build the full application router.
///
/// Middleware uses `Extension<ApiContext>`; handlers use `State<ApiContext>`.
pub fn api_router(core: Arc<CoreState>) -> Router {
    build_router(ApiContext::new(core))
}

fn build_router(ctx: ApiContext) -> Router {
    let upload_limit = ctx.core.config.max_upload_bytes;

    // Layers are applied bottom (innermost) to top (outermost).
    let protected = Router::new()
        .route(
            "/med/upload-medicine-image",
            post(endpoints::med::upload_medicine_image),
        )
        .route(
            "/med/upload-medical-report-image",
            post(endpoints::med::upload_report_image),
        )
        .route(
            "/med/upload-medical-report-pdf",
            post(endpoints::med::upload_report_pdf),
        )
        .route("/med/infoupdate", post(endpoints::med::info_update))
        .route("/med/infoget", get(endpoints::med::info_get))
        .route("/med/history", get(endpoints::med::history))
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::audit::log_access))
        .layer(axum::middleware::from_fn(middleware::auth::require_auth))
        .layer(axum::Extension(ctx.clone()));

    let public = Router::new()
        .route("/auth/signup", post(endpoints::auth::signup))
        .route("/auth/login", post(endpoints::auth::login))
        .route("/health", get(endpoints::health::check))
        .with_state(ctx);

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(DefaultBodyLimit::max(upload_limit))
        .layer(CorsLayer::permissive())
}
