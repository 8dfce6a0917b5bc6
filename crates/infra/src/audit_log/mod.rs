//! Storage and transport adapters for the audit trail.

pub mod postgres;
#[cfg(feature = "redis")]
pub mod redis_queue;

pub use postgres::PostgresHttpRequestLogRepository;
#[cfg(feature = "redis")]
pub use redis_queue::{AuditLogQueueWorker, RedisAuditLogQueue, RedisQueueError, WorkerHandle};
