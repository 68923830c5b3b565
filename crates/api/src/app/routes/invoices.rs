use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use tapor_core::InvoiceId;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_invoice).get(list_invoices))
        .route("/next-number", get(next_invoice_number))
        .route("/totals", post(preview_totals))
        .route(
            "/:id",
            get(get_invoice).put(update_invoice).delete(delete_invoice),
        )
        .route("/:id/convert", post(convert_pre_invoice))
}

pub async fn create_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::CreateInvoiceRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match dto::json_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    match services.engine.create_invoice(body.invoice, body.items).await {
        Ok(details) => (StatusCode::CREATED, Json(details)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn list_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::InvoiceListQuery>,
) -> axum::response::Response {
    let filter = match query.into_filter() {
        Ok(f) => f,
        Err(resp) => return resp,
    };

    match services.engine.list_invoices(&filter).await {
        Ok(list) => (StatusCode::OK, Json(list)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: InvoiceId = match dto::parse_id(&id, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine.get_invoice(id).await {
        Ok(details) => (StatusCode::OK, Json(details)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn update_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    body: Result<Json<dto::UpdateInvoiceRequest>, JsonRejection>,
) -> axum::response::Response {
    let id: InvoiceId = match dto::parse_id(&id, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let body = match dto::json_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    match services.engine.update_invoice(id, body.invoice, body.items).await {
        Ok(details) => (StatusCode::OK, Json(details)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn delete_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: InvoiceId = match dto::parse_id(&id, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine.delete_invoice(id).await {
        Ok(true) => (
            StatusCode::OK,
            Json(serde_json::json!({ "message": "invoice deleted" })),
        )
            .into_response(),
        Ok(false) => errors::json_error(StatusCode::NOT_FOUND, "not_found", "invoice not found"),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn convert_pre_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: InvoiceId = match dto::parse_id(&id, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.engine.convert_pre_invoice(id).await {
        Ok(details) => (StatusCode::OK, Json(details)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn next_invoice_number(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.engine.next_invoice_number().await {
        Ok(number) => (
            StatusCode::OK,
            Json(serde_json::json!({ "invoiceNumber": number })),
        )
            .into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn preview_totals(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::TotalsPreviewRequest>, JsonRejection>,
) -> axum::response::Response {
    let body = match dto::json_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    match services
        .engine
        .preview_totals(&body.items, body.discount_type, body.discount_value)
    {
        Ok(totals) => (StatusCode::OK, Json(totals)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}
