use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use tapor_infra::EngineError;

pub fn engine_error_to_response(err: EngineError) -> axum::response::Response {
    match err {
        EngineError::Validation { field, message } => {
            validation_error(field.as_deref(), message)
        }
        EngineError::NotFound(what) => {
            json_error(StatusCode::NOT_FOUND, "not_found", format!("{what} not found"))
        }
        EngineError::Conflict(msg) => json_error(StatusCode::CONFLICT, "conflict", msg),
        EngineError::InvariantViolation(msg) => {
            json_error(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", msg)
        }
        // Already logged by the engine; details stay server-side.
        EngineError::Storage(_) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_error",
            "internal storage error",
        ),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// 400 with an optional `field` naming the offending input.
pub fn validation_error(field: Option<&str>, message: impl Into<String>) -> axum::response::Response {
    let mut body = json!({
        "error": "validation_error",
        "message": message.into(),
    });
    if let Some(field) = field {
        body["field"] = json!(field);
    }
    (StatusCode::BAD_REQUEST, axum::Json(body)).into_response()
}
