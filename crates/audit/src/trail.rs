//! Audit trail orchestration.
//!
//! [`AuditTrail`] is the only entry point the rest of the platform uses to
//! record or prune audit data. Capture never fails from the caller's point of
//! view: storage and queue errors are logged and swallowed.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, instrument, warn};

use campus_auth::Ability;
use campus_core::OrganizationId;

use crate::{
    AuditLogJob, AuditLogQueue, AuditLogSettings, HttpRequestLogFactory, HttpRequestLogListFilters,
    HttpRequestLogPage, HttpRequestLogRepository, QueueError, RecordAuthActivityPayload,
    RecordHttpRequestLogPayload, RepositoryError, TransportMode,
};

#[derive(Debug, thiserror::Error)]
enum CaptureError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

pub struct AuditTrail {
    factory: HttpRequestLogFactory,
    repository: Arc<dyn HttpRequestLogRepository>,
    queue: Option<Arc<dyn AuditLogQueue>>,
    requested: TransportMode,
    retention_days: u32,
}

impl AuditTrail {
    /// Transport is fixed here. Queue transport requested without a ready
    /// queue falls back to direct writes for the lifetime of the trail.
    pub fn new(
        repository: Arc<dyn HttpRequestLogRepository>,
        queue: Option<Arc<dyn AuditLogQueue>>,
        settings: &AuditLogSettings,
    ) -> Self {
        let queue = match settings.transport {
            TransportMode::Command => None,
            TransportMode::Queue => match queue {
                Some(q) if q.is_ready() => Some(q),
                _ => {
                    warn!("audit-log queue transport requested but no queue connection is available; falling back to direct writes");
                    None
                }
            },
        };

        let effective = if queue.is_some() { TransportMode::Queue } else { TransportMode::Command };
        info!(
            requested = ?settings.transport,
            effective = ?effective,
            retention_days = settings.retention_days,
            "audit trail configured"
        );

        Self {
            factory: HttpRequestLogFactory::new(),
            repository,
            queue,
            requested: settings.transport,
            retention_days: settings.retention_days,
        }
    }

    /// Transport actually in use after fallback.
    pub fn transport(&self) -> TransportMode {
        if self.queue.is_some() {
            TransportMode::Queue
        } else {
            TransportMode::Command
        }
    }

    pub fn retention_days(&self) -> u32 {
        self.retention_days
    }

    pub fn cutoff_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.retention_days))
    }

    pub fn repository(&self) -> &Arc<dyn HttpRequestLogRepository> {
        &self.repository
    }

    /// A queue that lost its connection after startup is bypassed per call.
    fn ready_queue(&self) -> Option<&Arc<dyn AuditLogQueue>> {
        self.queue.as_ref().filter(|q| q.is_ready())
    }

    pub async fn capture_http_request(&self, payload: RecordHttpRequestLogPayload) {
        let method = payload.method.clone();
        let path = payload.path.clone();
        if let Err(err) = self.dispatch(AuditLogJob::HttpRequestLog(payload)).await {
            error!(error = %err, transport = ?self.requested, %method, %path, "failed to record HTTP request audit entry");
        }
    }

    pub async fn record_auth_activity(&self, payload: RecordAuthActivityPayload) {
        let event = payload.event.clone();
        if let Err(err) = self.dispatch(AuditLogJob::AuthActivity(payload)).await {
            error!(error = %err, transport = ?self.requested, %event, "failed to record auth activity audit entry");
        }
    }

    async fn dispatch(&self, job: AuditLogJob) -> Result<(), CaptureError> {
        match self.ready_queue() {
            Some(queue) => {
                debug!(kind = job.kind(), "enqueueing audit job");
                queue.enqueue(job.with_finite_measurements()).await?;
            }
            None => self.process_job(job).await?,
        }
        Ok(())
    }

    /// Direct write path; also what queue workers call for each job they consume.
    pub async fn process_job(&self, job: AuditLogJob) -> Result<(), RepositoryError> {
        let record = match job {
            AuditLogJob::HttpRequestLog(payload) => self.factory.create_from_http_request(payload.into_input()),
            AuditLogJob::AuthActivity(payload) => self.factory.create_auth_activity_log(payload.into_input()),
        };
        self.repository.create(record).await
    }

    /// Delete everything older than the retention window. Returns the number
    /// of removed records, or 0 when the delete failed.
    #[instrument(skip(self), fields(retention_days = self.retention_days))]
    pub async fn purge_expired_http_logs(&self) -> u64 {
        let cutoff = self.cutoff_at(Utc::now());
        match self.repository.delete_older_than(cutoff).await {
            Ok(deleted) => {
                info!(deleted, cutoff = %cutoff.to_rfc3339(), "pruned expired HTTP request logs");
                deleted
            }
            Err(err) => {
                error!(error = %err, cutoff = %cutoff.to_rfc3339(), "failed to prune expired HTTP request logs");
                0
            }
        }
    }

    pub async fn list_http_request_logs(
        &self,
        ability: &Ability,
        filters: &HttpRequestLogListFilters,
        caller_organization: Option<OrganizationId>,
    ) -> Result<HttpRequestLogPage, RepositoryError> {
        self.repository.list(ability, filters, caller_organization).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryAuditLogQueue, InMemoryHttpRequestLogRepository, Payload};
    use async_trait::async_trait;
    use campus_auth::AuthUser;
    use campus_core::UserId;

    struct FailingRepository;

    #[async_trait]
    impl HttpRequestLogRepository for FailingRepository {
        async fn create(&self, _: crate::HttpRequestLogRecord) -> Result<(), RepositoryError> {
            Err(RepositoryError::Storage("database is down".into()))
        }

        async fn list(
            &self,
            _: &Ability,
            filters: &HttpRequestLogListFilters,
            _: Option<OrganizationId>,
        ) -> Result<HttpRequestLogPage, RepositoryError> {
            Ok(HttpRequestLogPage::empty(filters))
        }

        async fn delete_older_than(&self, _: DateTime<Utc>) -> Result<u64, RepositoryError> {
            Err(RepositoryError::Storage("database is down".into()))
        }
    }

    fn queue_settings() -> AuditLogSettings {
        AuditLogSettings {
            transport: TransportMode::Queue,
            ..AuditLogSettings::default()
        }
    }

    fn request() -> RecordHttpRequestLogPayload {
        let mut payload = RecordHttpRequestLogPayload::new("post", "/courses", 201.0, 8.0);
        payload.body = Some(Payload::object([("contact", Payload::from("a@b.com"))]));
        payload
    }

    #[tokio::test]
    async fn command_transport_writes_directly() {
        let repo = Arc::new(InMemoryHttpRequestLogRepository::new());
        let trail = AuditTrail::new(repo.clone(), None, &AuditLogSettings::default());

        trail.capture_http_request(request()).await;

        let stored = repo.snapshot();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].method, "POST");
        assert!(stored[0].body_digest.is_some());
    }

    #[tokio::test]
    async fn queue_transport_enqueues_jobs() {
        let repo = Arc::new(InMemoryHttpRequestLogRepository::new());
        let (queue, mut rx) = InMemoryAuditLogQueue::new();
        let trail = AuditTrail::new(repo.clone(), Some(Arc::new(queue)), &queue_settings());
        assert_eq!(trail.transport(), TransportMode::Queue);

        trail.capture_http_request(request()).await;
        assert!(repo.is_empty());

        let job = rx.recv().await.unwrap();
        assert_eq!(job.kind(), "http-request-log");
        trail.process_job(job).await.unwrap();
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn queued_jobs_carry_only_finite_measurements() {
        let repo = Arc::new(InMemoryHttpRequestLogRepository::new());
        let (queue, mut rx) = InMemoryAuditLogQueue::new();
        let trail = AuditTrail::new(repo, Some(Arc::new(queue)), &queue_settings());

        trail
            .record_auth_activity(RecordAuthActivityPayload::new("login", f64::INFINITY, f64::NAN))
            .await;

        let job = rx.recv().await.unwrap();
        let decoded: AuditLogJob = serde_json::from_str(&serde_json::to_string(&job).unwrap()).unwrap();
        assert_eq!(decoded, job);
    }

    #[tokio::test]
    async fn missing_queue_falls_back_to_direct_writes() {
        let repo = Arc::new(InMemoryHttpRequestLogRepository::new());
        let trail = AuditTrail::new(repo.clone(), None, &queue_settings());
        assert_eq!(trail.transport(), TransportMode::Command);

        trail.capture_http_request(request()).await;
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn unready_queue_is_bypassed_per_call() {
        let repo = Arc::new(InMemoryHttpRequestLogRepository::new());
        let (queue, mut rx) = InMemoryAuditLogQueue::new();
        let queue = Arc::new(queue);
        let trail = AuditTrail::new(repo.clone(), Some(queue.clone()), &queue_settings());

        queue.set_ready(false);
        trail.record_auth_activity(RecordAuthActivityPayload::new("login", 200.0, 4.0)).await;

        assert_eq!(repo.len(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn capture_failures_are_absorbed() {
        let trail = AuditTrail::new(Arc::new(FailingRepository), None, &AuditLogSettings::default());
        trail.capture_http_request(request()).await;
        trail.record_auth_activity(RecordAuthActivityPayload::new("logout", 200.0, 1.0)).await;
    }

    #[tokio::test]
    async fn auth_activity_keeps_caller_identity() {
        let repo = Arc::new(InMemoryHttpRequestLogRepository::new());
        let trail = AuditTrail::new(repo.clone(), None, &AuditLogSettings::default());
        let user = AuthUser::new(UserId::new());

        let mut payload = RecordAuthActivityPayload::new("refresh-token", 200.0, 2.0);
        payload.auth_user = Some(user.clone());
        trail.record_auth_activity(payload).await;

        let stored = repo.snapshot();
        assert_eq!(stored[0].path, "/auth/activity/REFRESH-TOKEN");
        assert_eq!(stored[0].user_id, Some(user.id));
    }

    #[tokio::test]
    async fn purge_removes_only_expired_records() {
        let repo = Arc::new(InMemoryHttpRequestLogRepository::new());
        let settings = AuditLogSettings {
            retention_days: 30,
            ..AuditLogSettings::default()
        };
        let trail = AuditTrail::new(repo.clone(), None, &settings);

        for age in [40, 31, 29, 1] {
            let mut payload = request();
            payload.occurred_at = Some(Utc::now() - Duration::days(age));
            trail.capture_http_request(payload).await;
        }

        assert_eq!(trail.purge_expired_http_logs().await, 2);
        assert_eq!(trail.purge_expired_http_logs().await, 0);
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn purge_failure_reports_zero() {
        let trail = AuditTrail::new(Arc::new(FailingRepository), None, &AuditLogSettings::default());
        assert_eq!(trail.purge_expired_http_logs().await, 0);
    }

    #[test]
    fn cutoff_subtracts_retention_days() {
        let trail = AuditTrail::new(
            Arc::new(InMemoryHttpRequestLogRepository::new()),
            None,
            &AuditLogSettings::default(),
        );
        let now = Utc::now();
        assert_eq!(now - trail.cutoff_at(now), Duration::days(180));
    }
}
