//! `campus-audit`: HTTP/auth audit trail.
//!
//! ## Components
//!
//! - `redaction`: PII masking, size bounding and content digests
//! - `factory`: normalizes raw events into bounded [`HttpRequestLogRecord`]s
//! - `repository`: persistence contract, row-level visibility, retention deletes
//! - `queue`: optional asynchronous transport for capture jobs
//! - `trail`: transport selection and failure absorption ([`AuditTrail`])
//! - `retention`: the periodic prune task

pub mod capture;
pub mod factory;
pub mod payload;
pub mod queue;
pub mod record;
pub mod redaction;
pub mod repository;
pub mod retention;
pub mod settings;
pub mod trail;

pub use capture::{AuditLogJob, RecordAuthActivityPayload, RecordHttpRequestLogPayload};
pub use factory::{AuthActivityLogInput, HttpRequestLogFactory, HttpRequestLogInput};
pub use payload::Payload;
pub use queue::{AuditLogQueue, InMemoryAuditLogQueue, QueueError};
pub use record::HttpRequestLogRecord;
pub use redaction::{digest, sanitize, sanitize_at};
pub use repository::{
    HttpRequestLogListFilters, HttpRequestLogPage, HttpRequestLogRepository,
    InMemoryHttpRequestLogRepository, RepositoryError, RlsContext,
};
pub use retention::{RetentionHandle, RetentionScheduler};
pub use settings::{AuditLogSettings, TransportMode};
pub use trail::AuditTrail;
