use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use campus_audit::RepositoryError;
use campus_core::DomainError;

pub fn repository_error_to_response(err: RepositoryError) -> axum::response::Response {
    tracing::error!(error = %err, "audit-log store failure");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "store_error", err.to_string())
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

pub fn domain_error_to_response(err: DomainError) -> axum::response::Response {
    let (status, code) = match &err {
        DomainError::Validation(_) => (StatusCode::BAD_REQUEST, "validation_error"),
        DomainError::InvalidId(_) => (StatusCode::BAD_REQUEST, "invalid_id"),
        DomainError::NotFound => (StatusCode::NOT_FOUND, "not_found"),
    };
    json_error(status, code, err.to_string())
}
