//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: repository, queue, audit trail and background tasks
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request DTOs and query parsing
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};

use campus_auth::Hs256TokenValidator;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

pub use services::{AppServices, BackgroundTasks, StartupError, build_services};

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub fn build_app(services: Arc<AppServices>, jwt_secret: &str) -> Router {
    let auth_state = middleware::AuthState {
        validator: Arc::new(Hs256TokenValidator::new(jwt_secret.as_bytes())),
        trail: services.trail.clone(),
    };

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(Extension(services.clone()))
        .layer(axum::middleware::from_fn_with_state(services.clone(), middleware::enrich_user))
        .layer(axum::middleware::from_fn_with_state(auth_state, middleware::auth_middleware))
        .layer(axum::middleware::from_fn_with_state(
            services.trail.clone(),
            middleware::capture_http_request,
        ))
}
