//! Postgres-backed HTTP request log repository.
//!
//! Visibility is enforced twice. The caller's ability is rendered into the
//! `WHERE` clause, and the table's row-level security policy reads the
//! `app.is_system_admin` / `app.organization_id` session flags. Both flags are
//! set with `set_config(.., true)` inside the same transaction as the queries
//! that depend on them, so a pooled connection never carries one request's
//! context into another.
//!
//! ## Error Mapping
//!
//! | SQLx Error | RepositoryError |
//! |------------|-----------------|
//! | Database (any code) | `Storage` |
//! | PoolClosed | `Storage` |
//! | ColumnDecode / row mapping | `Serialization` |
//! | Other | `Storage` |

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use tracing::{Span, instrument};

use campus_audit::repository::log_access_filter;
use campus_audit::{
    HttpRequestLogListFilters, HttpRequestLogPage, HttpRequestLogRecord, HttpRequestLogRepository, RepositoryError,
    RlsContext,
};
use campus_auth::{AccessFilter, Ability, Condition, Field, FieldValue};
use campus_core::{LogId, OrganizationId, UserId};

/// Table DDL, indexes and row-level security policy. Idempotent.
pub const SCHEMA: &str = include_str!("../../sql/http_request_logs.sql");

const SELECT_COLUMNS: &str = "SELECT id, occurred_at, user_id, organization_id, roles, subject_scopes, \
     ip_address, forwarded_for, user_agent, method, path, status_code, duration_ms, \
     query_json, params_json, body_digest, response_digest, correlation_id \
     FROM http_request_logs";

const COUNT_ROWS: &str = "SELECT COUNT(*) AS total FROM http_request_logs";

/// Future returned by a [`PostgresHttpRequestLogRepository::with_rls_context`] body.
pub type TxFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 'c>>;

#[derive(Debug, Clone)]
pub struct PostgresHttpRequestLogRepository {
    pool: Arc<PgPool>,
}

impl PostgresHttpRequestLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Apply [`SCHEMA`].
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), RepositoryError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    /// Run `body` in one transaction whose row-level security flags come
    /// from `context`. Commits when `body` succeeds, rolls back otherwise.
    pub async fn with_rls_context<T, F>(&self, context: RlsContext, body: F) -> Result<T, RepositoryError>
    where
        T: Send,
        F: for<'c> FnOnce(&'c mut Transaction<'static, Postgres>) -> TxFuture<'c, T> + Send,
    {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        for (setting, value) in context.settings() {
            sqlx::query("SELECT set_config($1, $2, true)")
                .bind(setting)
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("set_rls_context", e))?;
        }

        let out = body(&mut tx).await?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(out)
    }
}

#[async_trait]
impl HttpRequestLogRepository for PostgresHttpRequestLogRepository {
    #[instrument(skip(self, record), fields(log_id = %record.id, path = %record.path), err)]
    async fn create(&self, record: HttpRequestLogRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO http_request_logs (
                id, occurred_at, user_id, organization_id, roles, subject_scopes,
                ip_address, forwarded_for, user_agent, method, path, status_code, duration_ms,
                query_json, params_json, body_digest, response_digest, correlation_id
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(*record.id.as_uuid())
        .bind(record.occurred_at)
        .bind(record.user_id.map(|id| *id.as_uuid()))
        .bind(record.organization_id.map(|id| *id.as_uuid()))
        .bind(&record.roles)
        .bind(&record.subject_scopes)
        .bind(&record.ip_address)
        .bind(&record.forwarded_for)
        .bind(&record.user_agent)
        .bind(&record.method)
        .bind(&record.path)
        .bind(i32::from(record.status_code))
        .bind(i32::try_from(record.duration_ms).unwrap_or(i32::MAX))
        .bind(&record.query_json)
        .bind(&record.params_json)
        .bind(&record.body_digest)
        .bind(&record.response_digest)
        .bind(&record.correlation_id)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_http_request_log", e))?;

        Ok(())
    }

    #[instrument(
        skip(self, ability, filters),
        fields(page = filters.page(), page_size = filters.page_size(), returned = tracing::field::Empty),
        err
    )]
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

        let context = RlsContext::new(ability, caller_organization);
        let filters = filters.clone();

        let page = self
            .with_rls_context(context, move |tx| {
                Box::pin(async move {
                    let total: i64 = scoped_query(COUNT_ROWS, &access, &filters)
                        .build()
                        .fetch_one(&mut **tx)
                        .await
                        .map_err(|e| map_sqlx_error("count_http_request_logs", e))?
                        .try_get("total")
                        .map_err(|e| RepositoryError::Serialization(format!("failed to read count: {e}")))?;

                    let mut query = scoped_query(SELECT_COLUMNS, &access, &filters);
                    query
                        .push(" ORDER BY occurred_at DESC, id DESC LIMIT ")
                        .push_bind(i64::from(filters.page_size()))
                        .push(" OFFSET ")
                        .push_bind(i64::try_from(filters.offset()).unwrap_or(i64::MAX));

                    let rows = query
                        .build()
                        .fetch_all(&mut **tx)
                        .await
                        .map_err(|e| map_sqlx_error("list_http_request_logs", e))?;

                    let items = rows.iter().map(record_from_row).collect::<Result<Vec<_>, _>>()?;
                    let total = u64::try_from(total).unwrap_or_default();
                    let has_more = filters.offset() + (items.len() as u64) < total;

                    Ok(HttpRequestLogPage {
                        total,
                        page: filters.page(),
                        page_size: filters.page_size(),
                        has_more,
                        items,
                    })
                })
            })
            .await?;

        Span::current().record("returned", page.items.len());
        Ok(page)
    }

    #[instrument(skip(self), fields(cutoff = %cutoff.to_rfc3339()), err)]
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let retention = RlsContext {
            is_system_admin: true,
            organization_id: None,
        };

        self.with_rls_context(retention, move |tx| {
            Box::pin(async move {
                let result = sqlx::query("DELETE FROM http_request_logs WHERE occurred_at < $1")
                    .bind(cutoff)
                    .execute(&mut **tx)
                    .await
                    .map_err(|e| map_sqlx_error("delete_old_http_request_logs", e))?;
                Ok(result.rows_affected())
            })
        })
        .await
    }
}

fn column(field: Field) -> Option<&'static str> {
    match field {
        Field::Id => Some("id"),
        Field::OrganizationId => Some("organization_id"),
        Field::UserId => Some("user_id"),
        _ => None,
    }
}

/// `select` plus a `WHERE` clause covering the ability filter and the
/// caller's list filters.
pub(crate) fn scoped_query<'a>(
    select: &str,
    access: &AccessFilter,
    filters: &HttpRequestLogListFilters,
) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(select);
    qb.push(" WHERE ");
    push_access(&mut qb, access);

    if let Some(from) = filters.from {
        qb.push(" AND occurred_at >= ").push_bind(from);
    }
    if let Some(to) = filters.to {
        qb.push(" AND occurred_at <= ").push_bind(to);
    }
    if let Some(user_id) = filters.user_id {
        qb.push(" AND user_id = ").push_bind(*user_id.as_uuid());
    }
    if !filters.status_codes.is_empty() {
        let codes: Vec<i32> = filters.status_codes.iter().map(|c| i32::from(*c)).collect();
        qb.push(" AND status_code = ANY(").push_bind(codes).push(")");
    }
    if let Some(min) = filters.min_duration() {
        qb.push(" AND duration_ms >= ").push_bind(min);
    }
    if let Some(max) = filters.max_duration() {
        qb.push(" AND duration_ms <= ").push_bind(max);
    }
    if let Some(needle) = filters.path_needle() {
        qb.push(" AND path ILIKE ").push_bind(format!("%{}%", escape_like(needle)));
    }
    qb
}

fn push_access(qb: &mut QueryBuilder<'_, Postgres>, access: &AccessFilter) {
    match access {
        AccessFilter::All => {
            qb.push("TRUE");
        }
        AccessFilter::Nothing => {
            qb.push("FALSE");
        }
        AccessFilter::AnyOf(conditions) => {
            qb.push("(");
            for (i, condition) in conditions.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                push_condition(qb, condition);
            }
            qb.push(")");
        }
    }
}

/// Render a condition. Fields without a column never match, as in
/// [`Condition::matches`].
fn push_condition(qb: &mut QueryBuilder<'_, Postgres>, condition: &Condition) {
    match condition {
        Condition::Eq { field, value } => push_eq(qb, *field, value),
        Condition::In { field, values } => {
            if values.is_empty() {
                qb.push("FALSE");
                return;
            }
            qb.push("(");
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    qb.push(" OR ");
                }
                push_eq(qb, *field, value);
            }
            qb.push(")");
        }
        Condition::And { all } => {
            if all.is_empty() {
                qb.push("TRUE");
                return;
            }
            qb.push("(");
            for (i, inner) in all.iter().enumerate() {
                if i > 0 {
                    qb.push(" AND ");
                }
                push_condition(qb, inner);
            }
            qb.push(")");
        }
    }
}

fn push_eq(qb: &mut QueryBuilder<'_, Postgres>, field: Field, value: &FieldValue) {
    let Some(column) = column(field) else {
        qb.push("FALSE");
        return;
    };

    match value {
        FieldValue::Null => {
            qb.push(column).push(" IS NULL");
        }
        FieldValue::Uuid(id) => {
            qb.push(column).push(" = ").push_bind(*id);
        }
        FieldValue::Text(text) => {
            qb.push(column).push("::text = ").push_bind(text.clone());
        }
        FieldValue::Bool(_) => {
            qb.push("FALSE");
        }
    }
}

fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn record_from_row(row: &PgRow) -> Result<HttpRequestLogRecord, RepositoryError> {
    let decode = |e: sqlx::Error| RepositoryError::Serialization(format!("failed to decode http_request_logs row: {e}"));

    let status_code: i32 = row.try_get("status_code").map_err(decode)?;
    let duration_ms: i32 = row.try_get("duration_ms").map_err(decode)?;
    let user_id: Option<uuid::Uuid> = row.try_get("user_id").map_err(decode)?;
    let organization_id: Option<uuid::Uuid> = row.try_get("organization_id").map_err(decode)?;

    Ok(HttpRequestLogRecord {
        id: LogId::from_uuid(row.try_get("id").map_err(decode)?),
        occurred_at: row.try_get("occurred_at").map_err(decode)?,
        user_id: user_id.map(UserId::from_uuid),
        organization_id: organization_id.map(OrganizationId::from_uuid),
        roles: row.try_get("roles").map_err(decode)?,
        subject_scopes: row.try_get("subject_scopes").map_err(decode)?,
        ip_address: row.try_get("ip_address").map_err(decode)?,
        forwarded_for: row.try_get("forwarded_for").map_err(decode)?,
        user_agent: row.try_get("user_agent").map_err(decode)?,
        method: row.try_get("method").map_err(decode)?,
        path: row.try_get("path").map_err(decode)?,
        status_code: u16::try_from(status_code).unwrap_or_default(),
        duration_ms: u32::try_from(duration_ms).unwrap_or_default(),
        query_json: row.try_get("query_json").map_err(decode)?,
        params_json: row.try_get("params_json").map_err(decode)?,
        body_digest: row.try_get("body_digest").map_err(decode)?,
        response_digest: row.try_get("response_digest").map_err(decode)?,
        correlation_id: row.try_get("correlation_id").map_err(decode)?,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RepositoryError {
    match err {
        sqlx::Error::Database(db_err) => {
            RepositoryError::Storage(format!("database error in {}: {}", operation, db_err.message()))
        }
        sqlx::Error::PoolClosed => RepositoryError::Storage(format!("connection pool closed in {}", operation)),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            RepositoryError::Serialization(format!("decode error in {}: {}", operation, err))
        }
        _ => RepositoryError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}
