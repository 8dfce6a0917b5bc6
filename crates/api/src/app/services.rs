use std::sync::Arc;

use sqlx::PgPool;
use tracing::{info, warn};

use campus_audit::{
    AuditLogQueue, AuditTrail, HttpRequestLogRepository, InMemoryHttpRequestLogRepository, RepositoryError,
    RetentionHandle, RetentionScheduler, TransportMode,
};
use campus_infra::audit_log::{
    AuditLogQueueWorker, PostgresHttpRequestLogRepository, RedisAuditLogQueue, RedisQueueError, WorkerHandle,
};
use campus_infra::config::AppConfig;
use campus_infra::read_model::{CourseCatalog, InMemoryCourseCatalog, InMemoryUserDirectory, UserDirectory};

/// Shared handles used by middleware and handlers.
pub struct AppServices {
    pub trail: Arc<AuditTrail>,
    pub catalog: Arc<dyn CourseCatalog>,
    pub directory: Arc<dyn UserDirectory>,
}

impl AppServices {
    pub fn new(
        trail: Arc<AuditTrail>,
        catalog: Arc<dyn CourseCatalog>,
        directory: Arc<dyn UserDirectory>,
    ) -> Self {
        Self { trail, catalog, directory }
    }

    /// Everything in memory, direct audit writes. Used by tests and local runs.
    pub fn in_memory(repository: Arc<dyn HttpRequestLogRepository>) -> Self {
        let trail = Arc::new(AuditTrail::new(repository, None, &Default::default()));
        Self::new(
            trail,
            Arc::new(InMemoryCourseCatalog::new()),
            Arc::new(InMemoryUserDirectory::new()),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to connect to Postgres: {0}")]
    Database(#[from] sqlx::Error),

    #[error("failed to prepare audit-log schema: {0}")]
    Schema(#[from] RepositoryError),

    #[error("failed to start audit-log queue worker: {0}")]
    Worker(#[from] RedisQueueError),
}

/// Background tasks owned by the process, stopped after the server drains.
#[derive(Debug, Default)]
pub struct BackgroundTasks {
    retention: Option<RetentionHandle>,
    worker: Option<WorkerHandle>,
}

impl BackgroundTasks {
    pub async fn shutdown(self) {
        if let Some(retention) = self.retention {
            retention.shutdown().await;
        }
        if let Some(worker) = self.worker {
            if let Err(err) = tokio::task::spawn_blocking(move || worker.shutdown()).await {
                warn!(error = %err, "audit-log worker did not stop cleanly");
            }
        }
        info!("background tasks stopped");
    }
}

/// Wire repository, queue, trail and background tasks from configuration.
pub async fn build_services(config: &AppConfig) -> Result<(AppServices, BackgroundTasks), StartupError> {
    let repository: Arc<dyn HttpRequestLogRepository> = match &config.database_url {
        Some(url) => {
            let pool = PgPool::connect(url).await?;
            let repository = PostgresHttpRequestLogRepository::new(pool);
            repository.ensure_schema().await?;
            info!("audit-log store: postgres");
            Arc::new(repository)
        }
        None => {
            info!("audit-log store: in-memory");
            Arc::new(InMemoryHttpRequestLogRepository::new())
        }
    };

    let redis_queue = match (config.audit.transport, &config.audit.queue_url) {
        (TransportMode::Queue, Some(url)) => connect_queue(url.clone()).await,
        _ => None,
    };
    let queue = redis_queue
        .clone()
        .map(|q| Arc::new(q) as Arc<dyn AuditLogQueue>);

    let trail = Arc::new(AuditTrail::new(repository, queue, &config.audit));

    let mut background = BackgroundTasks::default();
    if let (TransportMode::Queue, Some(queue)) = (trail.transport(), redis_queue) {
        let consumer = format!("campus-api-{}", std::process::id());
        background.worker = Some(AuditLogQueueWorker::spawn(queue, trail.clone(), consumer)?);
    }
    background.retention = RetentionScheduler::spawn(trail.clone(), &config.audit);

    let services = AppServices::new(
        trail,
        Arc::new(InMemoryCourseCatalog::new()),
        Arc::new(InMemoryUserDirectory::new()),
    );
    Ok((services, background))
}

async fn connect_queue(url: String) -> Option<RedisAuditLogQueue> {
    match tokio::task::spawn_blocking(move || RedisAuditLogQueue::connect(url, None)).await {
        Ok(Ok(queue)) => Some(queue),
        Ok(Err(err)) => {
            warn!(error = %err, "could not connect to audit-log queue");
            None
        }
        Err(err) => {
            warn!(error = %err, "audit-log queue connect task failed");
            None
        }
    }
}
