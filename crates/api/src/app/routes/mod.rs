use axum::{Router, routing::get};

use crate::authz::require;

pub mod audit_logs;
pub mod courses;
pub mod system;

/// Router for every guarded endpoint.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami).route_layer(require(&[])))
        .nest("/audit-logs", audit_logs::router())
        .nest("/courses", courses::router())
}
