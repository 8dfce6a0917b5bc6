use chrono::{DateTime, Utc};
use serde::Deserialize;

use campus_audit::HttpRequestLogListFilters;
use campus_core::{DomainError, OrganizationId, UserId};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateCourseRequest {
    pub title: String,
    pub subject: String,
    /// Defaults to the caller's organization.
    #[serde(default)]
    pub organization_id: Option<OrganizationId>,
    #[serde(default)]
    pub instructor_id: Option<UserId>,
    #[serde(default)]
    pub is_archived: bool,
}

/// Query string of `GET /audit-logs`.
#[derive(Debug, Default, Deserialize)]
pub struct AuditLogQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub user_id: Option<String>,
    /// Comma-separated list, e.g. `401,403`.
    pub status_codes: Option<String>,
    pub min_duration_ms: Option<i64>,
    pub max_duration_ms: Option<i64>,
    pub path: Option<String>,
}

impl AuditLogQuery {
    pub fn into_filters(self) -> Result<HttpRequestLogListFilters, DomainError> {
        let user_id = match self.user_id.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
            Some(raw) => Some(raw.parse::<UserId>()?),
            None => None,
        };

        Ok(HttpRequestLogListFilters {
            page: self.page,
            page_size: self.page_size,
            from: self.from,
            to: self.to,
            user_id,
            status_codes: parse_status_codes(self.status_codes.as_deref())?,
            min_duration_ms: self.min_duration_ms,
            max_duration_ms: self.max_duration_ms,
            path: self.path,
        })
    }
}

fn parse_status_codes(raw: Option<&str>) -> Result<Vec<u16>, DomainError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };

    raw.split(',')
        .map(str::trim)
        .filter(|code| !code.is_empty())
        .map(|code| {
            code.parse::<u16>()
                .map_err(|_| DomainError::validation(format!("`{code}` is not a status code")))
        })
        .collect()
}
