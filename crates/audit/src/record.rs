use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use campus_auth::{Field, FieldValue, Subject, SubjectType};
use campus_core::{LogId, OrganizationId, UserId};

/// One persisted HTTP request (or auth activity) log row.
///
/// Every field is bounded by [`crate::HttpRequestLogFactory`]; bodies are
/// only kept as digests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestLogRecord {
    pub id: LogId,
    pub occurred_at: DateTime<Utc>,
    pub user_id: Option<UserId>,
    pub organization_id: Option<OrganizationId>,
    pub roles: Vec<String>,
    pub subject_scopes: Vec<String>,
    pub ip_address: Option<String>,
    pub forwarded_for: Option<String>,
    pub user_agent: Option<String>,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    pub duration_ms: u32,
    pub query_json: Option<Value>,
    pub params_json: Option<Value>,
    pub body_digest: Option<String>,
    pub response_digest: Option<String>,
    pub correlation_id: Option<String>,
}

impl Subject for HttpRequestLogRecord {
    fn subject_type(&self) -> SubjectType {
        SubjectType::HttpRequestLog
    }

    fn field(&self, field: Field) -> Option<FieldValue> {
        match field {
            Field::Id => Some(self.id.into()),
            Field::OrganizationId => Some(self.organization_id.into()),
            Field::UserId => Some(self.user_id.into()),
            _ => None,
        }
    }
}
