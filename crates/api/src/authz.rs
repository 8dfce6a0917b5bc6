//! Policy enforcement at the route boundary.
//!
//! [`require`] wraps a route with a guard that builds the caller's ability,
//! stores it as [`RequestAbility`] and checks every declared requirement
//! before the handler runs. A route declaring no requirement is still guarded
//! so that its handler can rely on the ability being present.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::extract::Request;
use axum::response::Response;
use tower::{Layer, Service};
use tracing::debug;

use campus_auth::{AbilityFactory, AuthzError, RequiredAbility, authorize_all};

use crate::app::errors;
use crate::context::{RequestAbility, resolve_caller};

/// Guard layer for a route; requirements are evaluated conjunctively.
pub fn require(required: &[RequiredAbility]) -> RequireLayer {
    RequireLayer {
        required: required.iter().cloned().collect(),
    }
}

#[derive(Debug, Clone)]
pub struct RequireLayer {
    required: Arc<[RequiredAbility]>,
}

impl<S> Layer<S> for RequireLayer {
    type Service = RequireAbility<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequireAbility {
            inner,
            required: self.required.clone(),
            factory: AbilityFactory::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequireAbility<S> {
    inner: S,
    required: Arc<[RequiredAbility]>,
    factory: AbilityFactory,
}

impl<S> Service<Request> for RequireAbility<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let ability = Arc::new(self.factory.create_for_user(resolve_caller(req.extensions())));
        req.extensions_mut().insert(RequestAbility(ability.clone()));

        if let Err(err) = authorize_all(&ability, &self.required) {
            debug!(error = %err, path = %req.uri().path(), "request denied by policy");
            return Box::pin(async move { Ok(authz_error_to_response(err)) });
        }

        // The ready clone stays in `self`; the one that was polled serves this call.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        Box::pin(async move { inner.call(req).await })
    }
}

pub fn authz_error_to_response(err: AuthzError) -> Response {
    errors::json_error(axum::http::StatusCode::FORBIDDEN, "forbidden", err.to_string())
}
