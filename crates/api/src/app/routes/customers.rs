use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use tapor_core::CustomerId;
use tapor_customers::NewCustomer;

use crate::app::services::AppServices;
use crate::app::{dto, errors};

pub fn router() -> Router {
    Router::new()
        .route("/", post(register_customer).get(list_customers))
        .route("/:id", get(get_customer))
}

pub async fn register_customer(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<NewCustomer>, JsonRejection>,
) -> axum::response::Response {
    let body = match dto::json_body(body) {
        Ok(b) => b,
        Err(resp) => return resp,
    };

    match services.catalog.register_customer(body).await {
        Ok(customer) => (StatusCode::CREATED, Json(customer)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn list_customers(
    Extension(services): Extension<Arc<AppServices>>,
    Query(query): Query<dto::SearchQuery>,
) -> axum::response::Response {
    match services.catalog.list_customers(query.term()).await {
        Ok(list) => (StatusCode::OK, Json(list)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_customer(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: CustomerId = match dto::parse_id(&id, "id") {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    match services.catalog.get_customer(id).await {
        Ok(customer) => (StatusCode::OK, Json(customer)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}
