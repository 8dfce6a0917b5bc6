use axum::{Extension, Json, http::StatusCode, response::IntoResponse};

use crate::context::{Caller, RequestAbility};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(Caller(caller): Caller, Extension(ability): Extension<RequestAbility>) -> impl IntoResponse {
    let is_system_admin = ability.ability().is_system_admin();
    let body = match caller {
        None => serde_json::json!({
            "anonymous": true,
            "is_system_admin": is_system_admin,
        }),
        Some(user) => serde_json::json!({
            "anonymous": false,
            "user_id": user.id.to_string(),
            "organization_id": user.organization_id.map(|id| id.to_string()),
            "roles": user.roles.iter().map(|r| r.as_str()).collect::<Vec<_>>(),
            "subject_scopes": user.subject_scopes,
            "is_system_admin": is_system_admin,
        }),
    };
    Json(body)
}
