//! Normalizes raw HTTP and auth events into bounded log records.
//!
//! The factory never fails: malformed input is trimmed, clamped or replaced
//! by a default so a record can always be built.

use chrono::{DateTime, Utc};
use serde_json::Value;

use campus_core::{LogId, OrganizationId, UserId};

use crate::redaction::{MAX_ARRAY_ITEMS, MAX_KEY_CHARS, MAX_STRING_CHARS, cut_chars, digest, sanitize, single_line};
use crate::{HttpRequestLogRecord, Payload};

pub const MAX_METHOD_CHARS: usize = 16;
pub const MAX_PATH_CHARS: usize = 512;
pub const MAX_USER_AGENT_CHARS: usize = 1024;
pub const MAX_STATUS_CODE: u16 = 999;
pub const MAX_DURATION_MS: u32 = 60_000;

const UNKNOWN_METHOD: &str = "UNKNOWN";
const UNKNOWN_PATH: &str = "/unknown";
const AUTH_METHOD: &str = "AUTH";

/// Raw HTTP event. Numbers are taken as `f64` so out-of-range and
/// non-finite measurements can be clamped instead of rejected.
#[derive(Debug, Clone, Default)]
pub struct HttpRequestLogInput {
    pub occurred_at: Option<DateTime<Utc>>,
    pub user_id: Option<UserId>,
    pub organization_id: Option<OrganizationId>,
    pub roles: Vec<String>,
    pub subject_scopes: Vec<String>,
    pub ip_address: Option<String>,
    pub forwarded_for: Option<String>,
    pub user_agent: Option<String>,
    pub method: String,
    pub path: String,
    pub status_code: f64,
    pub duration_ms: f64,
    pub query: Option<Payload>,
    pub params: Option<Payload>,
    pub body: Option<Payload>,
    pub response_body: Option<Payload>,
    pub correlation_id: Option<String>,
}

/// Raw authentication event (login, logout, token refresh, rejection).
#[derive(Debug, Clone, Default)]
pub struct AuthActivityLogInput {
    pub occurred_at: Option<DateTime<Utc>>,
    pub user_id: Option<UserId>,
    pub organization_id: Option<OrganizationId>,
    pub roles: Vec<String>,
    pub subject_scopes: Vec<String>,
    pub ip_address: Option<String>,
    pub forwarded_for: Option<String>,
    pub user_agent: Option<String>,
    pub event: String,
    pub status_code: f64,
    pub duration_ms: f64,
    pub details: Option<Payload>,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Default, Copy, Clone)]
pub struct HttpRequestLogFactory;

impl HttpRequestLogFactory {
    pub fn new() -> Self {
        Self
    }

    pub fn create_from_http_request(&self, input: HttpRequestLogInput) -> HttpRequestLogRecord {
        HttpRequestLogRecord {
            id: LogId::new(),
            occurred_at: input.occurred_at.unwrap_or_else(Utc::now),
            user_id: input.user_id,
            organization_id: input.organization_id,
            roles: normalize_list(&input.roles),
            subject_scopes: normalize_list(&input.subject_scopes),
            ip_address: clean_single_line(input.ip_address.as_deref(), MAX_STRING_CHARS),
            forwarded_for: clean_single_line(input.forwarded_for.as_deref(), MAX_STRING_CHARS),
            user_agent: clean_single_line(input.user_agent.as_deref(), MAX_USER_AGENT_CHARS),
            method: clean_method(&input.method),
            path: clean_path(&input.path),
            status_code: clamp_status_code(input.status_code),
            duration_ms: clamp_duration(input.duration_ms),
            query_json: prepare_json(input.query.as_ref()),
            params_json: prepare_json(input.params.as_ref()),
            body_digest: digest(input.body.as_ref()),
            response_digest: digest(input.response_body.as_ref()),
            correlation_id: clean_single_line(input.correlation_id.as_deref(), MAX_STRING_CHARS),
        }
    }

    /// Auth events are stored as synthetic `AUTH /auth/activity/<EVENT>` requests
    /// whose body digest covers the event details.
    pub fn create_auth_activity_log(&self, input: AuthActivityLogInput) -> HttpRequestLogRecord {
        self.create_from_http_request(HttpRequestLogInput {
            occurred_at: input.occurred_at,
            user_id: input.user_id,
            organization_id: input.organization_id,
            roles: input.roles,
            subject_scopes: input.subject_scopes,
            ip_address: input.ip_address,
            forwarded_for: input.forwarded_for,
            user_agent: input.user_agent,
            method: AUTH_METHOD.to_string(),
            path: format!("/auth/activity/{}", clean_method(&input.event)),
            status_code: input.status_code,
            duration_ms: input.duration_ms,
            query: None,
            params: None,
            body: input.details,
            response_body: None,
            correlation_id: input.correlation_id,
        })
    }
}

fn clean_method(method: &str) -> String {
    let value = cut_chars(&method.trim().to_uppercase(), MAX_METHOD_CHARS);
    if value.is_empty() { UNKNOWN_METHOD.to_string() } else { value }
}

fn clean_path(path: &str) -> String {
    let value = cut_chars(path.trim(), MAX_PATH_CHARS);
    if value.is_empty() { UNKNOWN_PATH.to_string() } else { value }
}

fn clean_single_line(value: Option<&str>, max: usize) -> Option<String> {
    let normalized = single_line(value?);
    (!normalized.is_empty()).then(|| cut_chars(&normalized, max))
}

fn normalize_list(values: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for value in values {
        if out.len() >= MAX_ARRAY_ITEMS {
            break;
        }
        if let Some(clean) = clean_single_line(Some(value), MAX_KEY_CHARS) {
            if !out.contains(&clean) {
                out.push(clean);
            }
        }
    }
    out
}

fn clamp_status_code(value: f64) -> u16 {
    if !value.is_finite() {
        return 0;
    }
    value.trunc().clamp(0.0, f64::from(MAX_STATUS_CODE)) as u16
}

fn clamp_duration(value: f64) -> u32 {
    if !value.is_finite() {
        return 0;
    }
    value.trunc().clamp(0.0, f64::from(MAX_DURATION_MS)) as u32
}

/// Sanitized structured JSON; anything but a non-empty object becomes `None`.
fn prepare_json(value: Option<&Payload>) -> Option<Value> {
    match sanitize(value?) {
        Value::Object(map) if !map.is_empty() => Some(Value::Object(map)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn request(method: &str, path: &str) -> HttpRequestLogInput {
        HttpRequestLogInput {
            method: method.to_string(),
            path: path.to_string(),
            status_code: 200.0,
            duration_ms: 12.0,
            ..HttpRequestLogInput::default()
        }
    }

    fn is_digest(value: &str) -> bool {
        value
            .strip_prefix("sha256:")
            .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'))
    }

    #[test]
    fn masks_pii_and_digests_bodies() {
        let factory = HttpRequestLogFactory::new();
        let record = factory.create_from_http_request(HttpRequestLogInput {
            status_code: 201.0,
            duration_ms: 123.0,
            query: Some(Payload::object([
                ("email", Payload::from("user@example.com")),
                ("phone", Payload::from("+90 534 000 0000")),
            ])),
            params: Some(Payload::object([("id", Payload::from("abc-123"))])),
            body: Some(Payload::object([
                ("password", Payload::from("SuperSecret1!")),
                ("contact", Payload::from("a@b.com")),
            ])),
            response_body: Some(Payload::object([("success", Payload::from(true))])),
            roles: vec!["teacher".into(), "teacher".into()],
            subject_scopes: vec!["Music".into()],
            ..request("post", "/api/x")
        });

        assert_eq!(record.method, "POST");
        assert_eq!(record.path, "/api/x");
        assert_eq!(record.status_code, 201);
        assert_eq!(record.duration_ms, 123);
        assert_eq!(record.roles, ["teacher"]);
        assert_eq!(record.subject_scopes, ["Music"]);

        let query = record.query_json.as_ref().unwrap();
        assert_eq!(query["email"], "[redacted-email]");
        assert_eq!(query["phone"], "[redacted-phone]");
        assert_eq!(record.params_json.as_ref().unwrap()["id"], "abc-123");

        assert!(is_digest(record.body_digest.as_deref().unwrap()));
        assert!(is_digest(record.response_digest.as_deref().unwrap()));

        let stored = serde_json::to_string(&record).unwrap();
        assert!(!stored.contains("SuperSecret1!"));
        assert!(!stored.contains("a@b.com"));
        assert!(!stored.contains("user@example.com"));
    }

    #[test]
    fn defaults_blank_method_and_path() {
        let record = HttpRequestLogFactory::new().create_from_http_request(request("   ", "  "));
        assert_eq!(record.method, "UNKNOWN");
        assert_eq!(record.path, "/unknown");
    }

    #[test]
    fn bounds_method_and_path_length() {
        let long_path = format!("/{}", "p".repeat(700));
        let record = HttpRequestLogFactory::new().create_from_http_request(request("purge-everything-now", &long_path));
        assert_eq!(record.method, "PURGE-EVERYTHING");
        assert_eq!(record.path.chars().count(), MAX_PATH_CHARS);
    }

    #[test]
    fn clamps_measurements() {
        let factory = HttpRequestLogFactory::new();
        let clamp = |status: f64, duration: f64| {
            let record = factory.create_from_http_request(HttpRequestLogInput {
                status_code: status,
                duration_ms: duration,
                ..request("GET", "/")
            });
            (record.status_code, record.duration_ms)
        };

        assert_eq!(clamp(f64::NAN, f64::INFINITY), (0, 0));
        assert_eq!(clamp(-5.0, -1.0), (0, 0));
        assert_eq!(clamp(1200.0, 90_000.0), (999, 60_000));
        assert_eq!(clamp(204.9, 15.7), (204, 15));
    }

    #[test]
    fn cleans_single_line_fields() {
        let record = HttpRequestLogFactory::new().create_from_http_request(HttpRequestLogInput {
            ip_address: Some("  10.0.0.1 ".into()),
            forwarded_for: Some("   ".into()),
            user_agent: Some(format!("agent\n{}", "a".repeat(2000))),
            correlation_id: Some("req\t42".into()),
            ..request("GET", "/")
        });

        assert_eq!(record.ip_address.as_deref(), Some("10.0.0.1"));
        assert_eq!(record.forwarded_for, None);
        assert_eq!(record.user_agent.as_deref().map(|ua| ua.chars().count()), Some(MAX_USER_AGENT_CHARS));
        assert!(record.user_agent.as_deref().unwrap().starts_with("agent a"));
        assert_eq!(record.correlation_id.as_deref(), Some("req 42"));
    }

    #[test]
    fn bounds_and_dedupes_role_lists() {
        let roles: Vec<String> = (0..40).map(|i| format!("role-{i}")).chain(["role-0".to_string()]).collect();
        let record = HttpRequestLogFactory::new().create_from_http_request(HttpRequestLogInput {
            roles,
            subject_scopes: vec!["  ".into(), "math".into(), " math ".into(), "x".repeat(100)],
            ..request("GET", "/")
        });

        assert_eq!(record.roles.len(), MAX_ARRAY_ITEMS);
        assert_eq!(record.roles[0], "role-0");
        assert_eq!(record.subject_scopes, ["math".to_string(), "x".repeat(MAX_KEY_CHARS)]);
    }

    #[test]
    fn empty_structured_json_is_dropped() {
        let record = HttpRequestLogFactory::new().create_from_http_request(HttpRequestLogInput {
            query: Some(Payload::object(Vec::<(String, Payload)>::new())),
            params: Some(Payload::from("not-an-object")),
            ..request("GET", "/")
        });

        assert_eq!(record.query_json, None);
        assert_eq!(record.params_json, None);
        assert_eq!(record.body_digest, None);
    }

    #[test]
    fn keeps_caller_supplied_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 9, 1, 8, 0, 0).unwrap();
        let record = HttpRequestLogFactory::new().create_from_http_request(HttpRequestLogInput {
            occurred_at: Some(at),
            ..request("GET", "/")
        });
        assert_eq!(record.occurred_at, at);
    }

    #[test]
    fn auth_activity_becomes_synthetic_request() {
        let user_id = UserId::new();
        let record = HttpRequestLogFactory::new().create_auth_activity_log(AuthActivityLogInput {
            user_id: Some(user_id),
            event: "login".into(),
            status_code: 200.0,
            duration_ms: 40.0,
            details: Some(Payload::object([("email", Payload::from("teacher@school.example"))])),
            ..AuthActivityLogInput::default()
        });

        assert_eq!(record.method, "AUTH");
        assert_eq!(record.path, "/auth/activity/LOGIN");
        assert_eq!(record.user_id, Some(user_id));
        assert!(is_digest(record.body_digest.as_deref().unwrap()));
        assert_eq!(record.response_digest, None);
        assert_eq!(record.query_json, None);
        assert_eq!(record.params_json, None);
    }

    #[test]
    fn every_record_gets_a_fresh_id() {
        let factory = HttpRequestLogFactory::new();
        let a = factory.create_from_http_request(request("GET", "/"));
        let b = factory.create_from_http_request(request("GET", "/"));
        assert_ne!(a.id, b.id);
    }
}
