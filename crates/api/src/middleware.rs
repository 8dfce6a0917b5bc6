//! Request pipeline: bearer authentication, directory enrichment and audit
//! capture.
//!
//! Layer order, outermost first: [`capture_http_request`] →
//! [`auth_middleware`] → [`enrich_user`] → route guard → handler. The inner
//! layers copy the caller identity into the response extensions so that the
//! capture layer can attribute the request after the handler ran.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes, HttpBody, to_bytes};
use axum::extract::{ConnectInfo, FromRequestParts, Query, RawPathParams, Request, State};
use axum::http::{HeaderMap, Extensions, Method, StatusCode, Uri, header};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use tracing::debug;

use campus_audit::{AuditTrail, Payload, RecordAuthActivityPayload, RecordHttpRequestLogPayload};
use campus_auth::TokenValidator;

use crate::app::errors;
use crate::app::services::AppServices;
use crate::context::{AuthUserContext, TokenUser};

/// Request bodies above this size are refused. Larger responses pass through
/// without a digest.
pub const MAX_CAPTURED_BODY_BYTES: usize = 1024 * 1024;

pub const TOKEN_REJECTED_EVENT: &str = "token-rejected";

const CORRELATION_HEADERS: [&str; 3] = ["x-correlation-id", "x-request-id", "x-trace-id"];

#[derive(Clone)]
pub struct AuthState {
    pub validator: Arc<dyn TokenValidator>,
    pub trail: Arc<AuditTrail>,
}

/// Optional bearer authentication.
///
/// No `Authorization` header means an anonymous caller. A header that does
/// not carry a valid token ends the request with 401 and records a
/// `token-rejected` auth activity.
pub async fn auth_middleware(State(state): State<AuthState>, mut req: Request, next: Next) -> Response {
    let started = Instant::now();

    let bearer = extract_bearer(req.headers()).map(|token| token.map(str::to_owned));
    let token = match bearer {
        Ok(None) => return next.run(req).await,
        Ok(Some(token)) => token,
        Err(reason) => return reject_token(&state, &req, started, reason.to_string()),
    };

    let claims = match state.validator.validate(&token, Utc::now()) {
        Ok(claims) => claims,
        Err(err) => return reject_token(&state, &req, started, err.to_string()),
    };

    let user = claims.into_auth_user();
    req.extensions_mut().insert(TokenUser(user.clone()));

    let mut res = next.run(req).await;
    res.extensions_mut().insert(TokenUser(user));
    res
}

fn reject_token(state: &AuthState, req: &Request, started: Instant, reason: String) -> Response {
    debug!(%reason, "bearer token rejected");

    let headers = req.headers();
    let mut payload = RecordAuthActivityPayload::new(
        TOKEN_REJECTED_EVENT,
        f64::from(StatusCode::UNAUTHORIZED.as_u16()),
        elapsed_ms(started),
    );
    payload.ip_address = client_ip(headers, req.extensions());
    payload.forwarded_for = header_value(headers, "x-forwarded-for");
    payload.user_agent = header_value(headers, header::USER_AGENT.as_str());
    payload.correlation_id = correlation_id(headers);
    payload.details = Some(Payload::object([
        ("reason", Payload::from(reason)),
        ("path", Payload::from(req.uri().path())),
    ]));

    let trail = state.trail.clone();
    tokio::spawn(async move { trail.record_auth_activity(payload).await });

    errors::json_error(StatusCode::UNAUTHORIZED, "unauthorized", "invalid bearer token")
}

/// `Ok(None)` when no header is present; `Err` when present but unusable.
fn extract_bearer(headers: &HeaderMap) -> Result<Option<&str>, &'static str> {
    let Some(header) = headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let header = header.to_str().map_err(|_| "authorization header is not ASCII")?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or("authorization scheme is not Bearer")?
        .trim();
    if token.is_empty() {
        return Err("empty bearer token");
    }

    Ok(Some(token))
}

/// Merge the caller's directory profile into the token identity.
pub async fn enrich_user(State(services): State<Arc<AppServices>>, mut req: Request, next: Next) -> Response {
    let Some(TokenUser(user)) = req.extensions().get::<TokenUser>().cloned() else {
        return next.run(req).await;
    };

    let enriched = match services.directory.profile(user.id) {
        Some(profile) => profile.apply_to(user),
        None => user,
    };
    req.extensions_mut().insert(AuthUserContext(enriched.clone()));

    let mut res = next.run(req).await;
    res.extensions_mut().insert(AuthUserContext(enriched));
    res
}

/// Record every request/response pair through the audit trail.
///
/// The write is spawned after the response is produced, so a slow or failing
/// store never delays or fails the request.
pub async fn capture_http_request(State(trail): State<Arc<AuditTrail>>, req: Request, next: Next) -> Response {
    let started = Instant::now();
    let occurred_at = Utc::now();

    let (mut parts, body) = req.into_parts();
    let params = RawPathParams::from_request_parts(&mut parts, &())
        .await
        .ok()
        .and_then(|raw| {
            let entries: Vec<(String, Payload)> =
                raw.iter().map(|(k, v)| (k.to_string(), Payload::from(v))).collect();
            (!entries.is_empty()).then(|| Payload::object(entries))
        });

    let mut payload = RecordHttpRequestLogPayload::new(parts.method.as_str(), parts.uri.path(), 0.0, 0.0);
    payload.occurred_at = Some(occurred_at);
    payload.ip_address = client_ip(&parts.headers, &parts.extensions);
    payload.forwarded_for = header_value(&parts.headers, "x-forwarded-for");
    payload.user_agent = header_value(&parts.headers, header::USER_AGENT.as_str());
    payload.correlation_id = correlation_id(&parts.headers);
    payload.query = query_payload(&parts.uri);
    payload.params = params;

    let body = if captures_body(&parts.method) {
        match to_bytes(body, MAX_CAPTURED_BODY_BYTES).await {
            Ok(bytes) => {
                payload.body = body_payload(&bytes);
                Body::from(bytes)
            }
            Err(_) => {
                return errors::json_error(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    "payload_too_large",
                    "request body exceeds the accepted size",
                );
            }
        }
    } else {
        body
    };

    let res = next.run(Request::from_parts(parts, body)).await;

    payload.status_code = f64::from(res.status().as_u16());
    payload.auth_user = res
        .extensions()
        .get::<AuthUserContext>()
        .map(|ctx| ctx.0.clone())
        .or_else(|| res.extensions().get::<TokenUser>().map(|token| token.0.clone()));

    let (res, response_body) = buffer_json_response(res).await;
    payload.response_body = response_body;
    payload.duration_ms = elapsed_ms(started);

    tokio::spawn(async move { trail.capture_http_request(payload).await });
    res
}

fn captures_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

async fn buffer_json_response(res: Response) -> (Response, Option<Payload>) {
    let is_json = res
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    // Bodies of unknown or oversized length go out untouched and uncaptured.
    let fits = res
        .body()
        .size_hint()
        .upper()
        .is_some_and(|upper| upper <= MAX_CAPTURED_BODY_BYTES as u64);
    if !is_json || !fits {
        return (res, None);
    }

    let (parts, body) = res.into_parts();
    match to_bytes(body, MAX_CAPTURED_BODY_BYTES).await {
        Ok(bytes) => {
            let payload = body_payload(&bytes);
            (Response::from_parts(parts, Body::from(bytes)), payload)
        }
        Err(err) => {
            debug!(error = %err, "response body not captured");
            (Response::from_parts(parts, Body::empty()), None)
        }
    }
}

/// JSON when it parses, otherwise the lossy text.
fn body_payload(bytes: &Bytes) -> Option<Payload> {
    if bytes.is_empty() {
        return None;
    }
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(value) => Some(Payload::from(value)),
        Err(_) => Some(Payload::from(String::from_utf8_lossy(bytes).into_owned())),
    }
}

fn query_payload(uri: &Uri) -> Option<Payload> {
    let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(uri).ok()?;
    if pairs.is_empty() {
        return None;
    }
    Some(Payload::object(pairs.into_iter().map(|(k, v)| (k, Payload::from(v)))))
}

fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> Option<String> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .or_else(|| header_value(headers, "x-real-ip"))
}

fn correlation_id(headers: &HeaderMap) -> Option<String> {
    CORRELATION_HEADERS.iter().find_map(|name| header_value(headers, name))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
