//! Capture payloads handed to [`crate::AuditTrail`] and carried by the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use campus_auth::AuthUser;

use crate::factory::{AuthActivityLogInput, HttpRequestLogInput};
use crate::Payload;

/// One observed HTTP request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordHttpRequestLogPayload {
    pub method: String,
    pub path: String,
    pub status_code: f64,
    pub duration_ms: f64,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub forwarded_for: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub query: Option<Payload>,
    #[serde(default)]
    pub params: Option<Payload>,
    #[serde(default)]
    pub body: Option<Payload>,
    #[serde(default)]
    pub response_body: Option<Payload>,
    #[serde(default)]
    pub auth_user: Option<AuthUser>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl RecordHttpRequestLogPayload {
    pub fn new(method: impl Into<String>, path: impl Into<String>, status_code: f64, duration_ms: f64) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            status_code,
            duration_ms,
            occurred_at: None,
            ip_address: None,
            forwarded_for: None,
            user_agent: None,
            query: None,
            params: None,
            body: None,
            response_body: None,
            auth_user: None,
            correlation_id: None,
        }
    }

    pub(crate) fn into_input(self) -> HttpRequestLogInput {
        let identity = CallerIdentity::from(self.auth_user.as_ref());
        HttpRequestLogInput {
            occurred_at: self.occurred_at,
            user_id: identity.user_id,
            organization_id: identity.organization_id,
            roles: identity.roles,
            subject_scopes: identity.subject_scopes,
            ip_address: self.ip_address,
            forwarded_for: self.forwarded_for,
            user_agent: self.user_agent,
            method: self.method,
            path: self.path,
            status_code: self.status_code,
            duration_ms: self.duration_ms,
            query: self.query,
            params: self.params,
            body: self.body,
            response_body: self.response_body,
            correlation_id: self.correlation_id,
        }
    }
}

/// One authentication event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordAuthActivityPayload {
    pub event: String,
    pub status_code: f64,
    pub duration_ms: f64,
    #[serde(default)]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub forwarded_for: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub details: Option<Payload>,
    #[serde(default)]
    pub auth_user: Option<AuthUser>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl RecordAuthActivityPayload {
    pub fn new(event: impl Into<String>, status_code: f64, duration_ms: f64) -> Self {
        Self {
            event: event.into(),
            status_code,
            duration_ms,
            occurred_at: None,
            ip_address: None,
            forwarded_for: None,
            user_agent: None,
            details: None,
            auth_user: None,
            correlation_id: None,
        }
    }

    pub(crate) fn into_input(self) -> AuthActivityLogInput {
        let identity = CallerIdentity::from(self.auth_user.as_ref());
        AuthActivityLogInput {
            occurred_at: self.occurred_at,
            user_id: identity.user_id,
            organization_id: identity.organization_id,
            roles: identity.roles,
            subject_scopes: identity.subject_scopes,
            ip_address: self.ip_address,
            forwarded_for: self.forwarded_for,
            user_agent: self.user_agent,
            event: self.event,
            status_code: self.status_code,
            duration_ms: self.duration_ms,
            details: self.details,
            correlation_id: self.correlation_id,
        }
    }
}

/// Unit of work on the audit queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum AuditLogJob {
    HttpRequestLog(RecordHttpRequestLogPayload),
    AuthActivity(RecordAuthActivityPayload),
}

impl AuditLogJob {
    pub fn kind(&self) -> &'static str {
        match self {
            AuditLogJob::HttpRequestLog(_) => "http-request-log",
            AuditLogJob::AuthActivity(_) => "auth-activity",
        }
    }

    /// Replace non-finite measurements with zero, which is what the factory
    /// stores for them anyway. JSON has no encoding for NaN or infinity.
    pub fn with_finite_measurements(mut self) -> Self {
        let (status_code, duration_ms) = match &mut self {
            AuditLogJob::HttpRequestLog(p) => (&mut p.status_code, &mut p.duration_ms),
            AuditLogJob::AuthActivity(p) => (&mut p.status_code, &mut p.duration_ms),
        };
        for value in [status_code, duration_ms] {
            if !value.is_finite() {
                *value = 0.0;
            }
        }
        self
    }
}

#[derive(Default)]
struct CallerIdentity {
    user_id: Option<campus_core::UserId>,
    organization_id: Option<campus_core::OrganizationId>,
    roles: Vec<String>,
    subject_scopes: Vec<String>,
}

impl From<Option<&AuthUser>> for CallerIdentity {
    fn from(user: Option<&AuthUser>) -> Self {
        let Some(user) = user else {
            return Self::default();
        };
        Self {
            user_id: Some(user.id),
            organization_id: user.organization_id,
            roles: user.roles.iter().map(|r| r.as_str().to_string()).collect(),
            subject_scopes: user.subject_scopes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_auth::Role;
    use campus_core::{OrganizationId, UserId};

    #[test]
    fn jobs_are_tagged_by_type() {
        let job = AuditLogJob::AuthActivity(RecordAuthActivityPayload::new("login", 200.0, 5.0));
        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["type"], "auth-activity");
        assert_eq!(json["payload"]["event"], "login");
        assert_eq!(job.kind(), "auth-activity");

        let back: AuditLogJob = serde_json::from_value(json).unwrap();
        assert_eq!(back, job);
    }

    #[test]
    fn non_finite_measurements_survive_serialization_as_zero() {
        let job = AuditLogJob::HttpRequestLog(RecordHttpRequestLogPayload::new("GET", "/", f64::NAN, f64::INFINITY))
            .with_finite_measurements();
        let json = serde_json::to_string(&job).unwrap();

        let AuditLogJob::HttpRequestLog(back) = serde_json::from_str(&json).unwrap() else {
            panic!("job kind changed in transit");
        };
        assert_eq!(back.status_code, 0.0);
        assert_eq!(back.duration_ms, 0.0);

        let kept = AuditLogJob::AuthActivity(RecordAuthActivityPayload::new("login", 200.0, 12.5))
            .with_finite_measurements();
        assert_eq!(kept, AuditLogJob::AuthActivity(RecordAuthActivityPayload::new("login", 200.0, 12.5)));
    }

    #[test]
    fn caller_identity_flows_into_factory_input() {
        let org = OrganizationId::new();
        let user = AuthUser::new(UserId::new())
            .with_roles([Role::TEACHER])
            .with_subject_scopes(["math"])
            .with_organization(org);

        let mut payload = RecordHttpRequestLogPayload::new("GET", "/courses", 200.0, 3.0);
        payload.auth_user = Some(user.clone());

        let input = payload.into_input();
        assert_eq!(input.user_id, Some(user.id));
        assert_eq!(input.organization_id, Some(org));
        assert_eq!(input.roles, ["teacher"]);
        assert_eq!(input.subject_scopes, ["math"]);
    }

    #[test]
    fn anonymous_payload_has_no_identity() {
        let input = RecordAuthActivityPayload::new("token-rejected", 401.0, 1.0).into_input();
        assert_eq!(input.user_id, None);
        assert!(input.roles.is_empty());
    }
}
