//! Persistence contract for HTTP request logs.
//!
//! Reads are always scoped twice: once by the caller's ability (translated
//! into an [`AccessFilter`]) and once by the row-level security context that
//! the storage layer enforces on its own.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use campus_auth::{AccessFilter, Ability, Action, SubjectType};
use campus_core::{OrganizationId, UserId};

use crate::HttpRequestLogRecord;

pub const DEFAULT_PAGE_SIZE: u32 = 25;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Caller-supplied list filters. All present filters are combined conjunctively.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequestLogListFilters {
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub status_codes: Vec<u16>,
    #[serde(default)]
    pub min_duration_ms: Option<i64>,
    #[serde(default)]
    pub max_duration_ms: Option<i64>,
    /// Case-insensitive substring of the request path.
    #[serde(default)]
    pub path: Option<String>,
}

impl HttpRequestLogListFilters {
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    pub fn page_size(&self) -> u32 {
        self.page_size.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.page_size())
    }

    pub fn min_duration(&self) -> Option<i64> {
        self.min_duration_ms.map(|v| v.max(0))
    }

    pub fn max_duration(&self) -> Option<i64> {
        self.max_duration_ms.map(|v| v.max(0))
    }

    /// Trimmed path needle; blank means no path filter.
    pub fn path_needle(&self) -> Option<&str> {
        self.path.as_deref().map(str::trim).filter(|p| !p.is_empty())
    }

    /// In-process evaluation, mirroring the SQL built by the Postgres store.
    pub fn matches(&self, record: &HttpRequestLogRecord) -> bool {
        if self.from.is_some_and(|from| record.occurred_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| record.occurred_at > to) {
            return false;
        }
        if self.user_id.is_some_and(|id| record.user_id != Some(id)) {
            return false;
        }
        if !self.status_codes.is_empty() && !self.status_codes.contains(&record.status_code) {
            return false;
        }
        let duration = i64::from(record.duration_ms);
        if self.min_duration().is_some_and(|min| duration < min) {
            return false;
        }
        if self.max_duration().is_some_and(|max| duration > max) {
            return false;
        }
        if let Some(needle) = self.path_needle() {
            if !record.path.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestLogPage {
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub has_more: bool,
    pub items: Vec<HttpRequestLogRecord>,
}

impl HttpRequestLogPage {
    pub fn empty(filters: &HttpRequestLogListFilters) -> Self {
        Self {
            total: 0,
            page: filters.page(),
            page_size: filters.page_size(),
            has_more: false,
            items: Vec::new(),
        }
    }
}

/// Session flags consumed by the storage-level row security policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RlsContext {
    pub is_system_admin: bool,
    pub organization_id: Option<OrganizationId>,
}

impl RlsContext {
    pub const SYSTEM_ADMIN_SETTING: &'static str = "app.is_system_admin";
    pub const ORGANIZATION_SETTING: &'static str = "app.organization_id";

    pub fn new(ability: &Ability, organization_id: Option<OrganizationId>) -> Self {
        Self {
            is_system_admin: ability.is_system_admin(),
            organization_id,
        }
    }

    /// `(setting, value)` pairs to apply with `set_config(.., true)`.
    pub fn settings(&self) -> [(&'static str, String); 2] {
        [
            (Self::SYSTEM_ADMIN_SETTING, self.is_system_admin.to_string()),
            (
                Self::ORGANIZATION_SETTING,
                self.organization_id.map(|id| id.to_string()).unwrap_or_default(),
            ),
        ]
    }

    /// The storage policy: admins see everything, others only their organization.
    pub fn permits(&self, record: &HttpRequestLogRecord) -> bool {
        self.is_system_admin || (self.organization_id.is_some() && record.organization_id == self.organization_id)
    }
}

/// Row filter for listing logs on behalf of `ability`.
pub fn log_access_filter(ability: &Ability) -> AccessFilter {
    ability.accessible_filter(Action::Manage, SubjectType::HttpRequestLog)
}

#[async_trait]
pub trait HttpRequestLogRepository: Send + Sync {
    /// Single insert; records arrive already normalized.
    async fn create(&self, record: HttpRequestLogRecord) -> Result<(), RepositoryError>;

    /// Newest first. Returns an empty page without touching storage when the
    /// ability grants no access at all.
    async fn list(
        &self,
        ability: &Ability,
        filters: &HttpRequestLogListFilters,
        caller_organization: Option<OrganizationId>,
    ) -> Result<HttpRequestLogPage, RepositoryError>;

    /// Hard-delete records with `occurred_at < cutoff`, returning how many went.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError>;
}

/// Process-local store for tests and database-less development.
///
/// Enforces the same row security policy as the SQL schema.
#[derive(Debug, Default)]
pub struct InMemoryHttpRequestLogRepository {
    records: RwLock<Vec<HttpRequestLogRecord>>,
}

impl InMemoryHttpRequestLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unscoped copy of every stored record.
    pub fn snapshot(&self) -> Vec<HttpRequestLogRecord> {
        self.records.read().map(|r| r.clone()).unwrap_or_default()
    }
}

fn lock_poisoned<T>(_: T) -> RepositoryError {
    RepositoryError::Storage("lock poisoned".to_string())
}

#[async_trait]
impl HttpRequestLogRepository for InMemoryHttpRequestLogRepository {
    async fn create(&self, record: HttpRequestLogRecord) -> Result<(), RepositoryError> {
        self.records.write().map_err(lock_poisoned)?.push(record);
        Ok(())
    }

    async fn list(
        &self,
        ability: &Ability,
        filters: &HttpRequestLogListFilters,
        caller_organization: Option<OrganizationId>,
    ) -> Result<HttpRequestLogPage, RepositoryError> {
        let access = log_access_filter(ability);
        if access == AccessFilter::Nothing {
            return Ok(HttpRequestLogPage::empty(filters));
        }
        let rls = RlsContext::new(ability, caller_organization);

        let mut visible: Vec<HttpRequestLogRecord> = self
            .records
            .read()
            .map_err(lock_poisoned)?
            .iter()
            .filter(|r| rls.permits(r) && access.permits(*r) && filters.matches(r))
            .cloned()
            .collect();
        visible.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at).then_with(|| b.id.cmp(&a.id)));

        let total = visible.len() as u64;
        let skip = usize::try_from(filters.offset()).unwrap_or(usize::MAX);
        let items: Vec<_> = visible
            .into_iter()
            .skip(skip)
            .take(filters.page_size() as usize)
            .collect();
        let has_more = filters.offset() + (items.len() as u64) < total;

        Ok(HttpRequestLogPage {
            total,
            page: filters.page(),
            page_size: filters.page_size(),
            has_more,
            items,
        })
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let mut records = self.records.write().map_err(lock_poisoned)?;
        let before = records.len();
        records.retain(|r| r.occurred_at >= cutoff);
        Ok((before - records.len()) as u64)
    }
}
