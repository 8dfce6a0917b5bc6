use std::sync::Arc;

use axum::{
    Extension, Json, Router,
    extract::Query,
    response::IntoResponse,
    routing::get,
};

use campus_auth::{Action, RequiredAbility, SubjectType};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::authz::require;
use crate::context::{Caller, RequestAbility};

pub fn router() -> Router {
    Router::new().route(
        "/",
        get(list_audit_logs).route_layer(require(&[RequiredAbility::new(
            Action::Manage,
            SubjectType::HttpRequestLog,
        )])),
    )
}

/// Paginated HTTP request logs visible to the caller.
pub async fn list_audit_logs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(ability): Extension<RequestAbility>,
    Caller(caller): Caller,
    Query(query): Query<dto::AuditLogQuery>,
) -> axum::response::Response {
    let filters = match query.into_filters() {
        Ok(filters) => filters,
        Err(err) => return errors::domain_error_to_response(err),
    };
    let organization_id = caller.and_then(|user| user.organization_id);

    match services
        .trail
        .list_http_request_logs(ability.ability(), &filters, organization_id)
        .await
    {
        Ok(page) => Json(page).into_response(),
        Err(err) => errors::repository_error_to_response(err),
    }
}
