use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/stats", get(stats))
        .route("/recent-invoices", get(recent_invoices))
        .route("/top-products", get(top_products))
}

pub async fn stats(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.dashboard.stats().await {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn recent_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::LimitQuery>,
) -> axum::response::Response {
    let limit = match query.limit() {
        Ok(l) => l,
        Err(resp) => return resp,
    };

    match services.dashboard.recent_invoices(limit).await {
        Ok(list) => (StatusCode::OK, Json(list)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn top_products(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::LimitQuery>,
) -> axum::response::Response {
    let limit = match query.limit() {
        Ok(l) => l,
        Err(resp) => return resp,
    };

    match services.dashboard.top_products(limit).await {
        Ok(list) => (StatusCode::OK, Json(list)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}
