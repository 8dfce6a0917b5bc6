//! Redis Streams-backed audit-log queue (durable, at-least-once delivery).
//!
//! - **Stream Key**: `campus:audit-log`
//! - **Consumer Group**: `audit-log.writer`
//! - **Entry fields**: `type` (job kind) and `payload` (job JSON)
//!
//! The producer appends with XADD. [`AuditLogQueueWorker`] reads with
//! XREADGROUP, writes each job through [`AuditTrail::process_job`] and
//! acknowledges it with XACK once the write succeeded.
//!
//! A worker starts by walking its own pending list, then blocks on new
//! entries. Entries whose write failed stay pending; every
//! `RECLAIM_INTERVAL` the worker claims entries idle for longer than
//! `RECLAIM_MIN_IDLE_MS` (its own, or those of a consumer that went away)
//! and walks its pending list again.

use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::Commands;
use redis::streams::{
    StreamClaimReply, StreamPendingCountReply, StreamPendingId, StreamReadOptions, StreamReadReply,
};
use tracing::{debug, error, info, instrument, warn};

use campus_audit::{AuditLogJob, AuditLogQueue, AuditTrail, QueueError, RepositoryError};

pub const DEFAULT_STREAM_KEY: &str = "campus:audit-log";
pub const DEFAULT_GROUP: &str = "audit-log.writer";

const READ_COUNT: usize = 10;
const READ_BLOCK_MS: usize = 1000;
const RECLAIM_COUNT: usize = 100;
const RECLAIM_MIN_IDLE_MS: usize = 30_000;
const RECLAIM_INTERVAL: Duration = Duration::from_secs(30);
const FAILURE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum RedisQueueError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<RedisQueueError> for QueueError {
    fn from(err: RedisQueueError) -> Self {
        match err {
            RedisQueueError::Connection(msg) => QueueError::Unavailable(msg),
            RedisQueueError::Command(msg) => QueueError::Enqueue(msg),
            RedisQueueError::Serialization(msg) => QueueError::Serialization(msg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedisAuditLogQueue {
    client: Arc<redis::Client>,
    stream_key: String,
}

impl RedisAuditLogQueue {
    /// Open the client and verify the server answers PING. A failure here is
    /// what sends the audit trail to direct writes.
    pub fn connect(redis_url: impl AsRef<str>, stream_key: Option<String>) -> Result<Self, RedisQueueError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(|e| RedisQueueError::Connection(e.to_string()))?;

        let mut conn = client
            .get_connection_with_timeout(Duration::from_secs(2))
            .map_err(|e| RedisQueueError::Connection(e.to_string()))?;
        let _: String = redis::cmd("PING")
            .query(&mut conn)
            .map_err(|e| RedisQueueError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            stream_key: stream_key.unwrap_or_else(|| DEFAULT_STREAM_KEY.to_string()),
        })
    }

    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    fn connection(&self) -> Result<redis::Connection, RedisQueueError> {
        self.client
            .get_connection()
            .map_err(|e| RedisQueueError::Connection(e.to_string()))
    }

    /// Create the consumer group (and the stream) if missing. Idempotent.
    pub fn ensure_consumer_group(&self, group: &str) -> Result<(), RedisQueueError> {
        let mut conn = self.connection()?;
        let created: redis::RedisResult<String> = conn.xgroup_create_mkstream(&self.stream_key, group, "0");
        match created {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(RedisQueueError::Command(format!("XGROUP CREATE failed: {}", e))),
        }
    }

    #[instrument(skip(self, job), fields(stream_key = %self.stream_key, kind = job.kind()), err)]
    fn publish_sync(&self, job: &AuditLogJob) -> Result<(), RedisQueueError> {
        let fields = encode_job(job)?;
        let mut conn = self.connection()?;

        let _: String = conn
            .xadd(&self.stream_key, "*", &fields)
            .map_err(|e| RedisQueueError::Command(format!("XADD failed: {}", e)))?;
        Ok(())
    }

    fn read_group_sync(
        &self,
        conn: &mut redis::Connection,
        group: &str,
        consumer: &str,
        cursor: &ReadCursor,
    ) -> Result<Vec<StreamEntry>, RedisQueueError> {
        let mut options = StreamReadOptions::default().group(group, consumer).count(READ_COUNT);
        if cursor.blocks() {
            options = options.block(READ_BLOCK_MS);
        }

        let reply: Option<StreamReadReply> = conn
            .xread_options(&[&self.stream_key], &[cursor.id()], &options)
            .map_err(|e| RedisQueueError::Command(format!("XREADGROUP failed: {}", e)))?;

        let mut entries = Vec::new();
        for key in reply.map(|r| r.keys).unwrap_or_default() {
            for id in key.ids {
                let payload: Option<String> = id.get("payload");
                entries.push(StreamEntry {
                    job: decode_payload(payload.as_deref()),
                    id: id.id,
                });
            }
        }
        Ok(entries)
    }

    /// Claim entries of the group idle for at least `RECLAIM_MIN_IDLE_MS`
    /// into this consumer's pending list. Returns how many were claimed.
    fn reclaim_stale_sync(
        &self,
        conn: &mut redis::Connection,
        group: &str,
        consumer: &str,
    ) -> Result<usize, RedisQueueError> {
        let pending: StreamPendingCountReply = conn
            .xpending_count(&self.stream_key, group, "-", "+", RECLAIM_COUNT)
            .map_err(|e| RedisQueueError::Command(format!("XPENDING failed: {}", e)))?;

        let ids = stale_ids(&pending.ids, RECLAIM_MIN_IDLE_MS);
        if ids.is_empty() {
            return Ok(0);
        }

        let claimed: StreamClaimReply = conn
            .xclaim(&self.stream_key, group, consumer, RECLAIM_MIN_IDLE_MS, &ids[..])
            .map_err(|e| RedisQueueError::Command(format!("XCLAIM failed: {}", e)))?;
        Ok(claimed.ids.len())
    }

    fn acknowledge_sync(&self, conn: &mut redis::Connection, group: &str, id: &str) -> Result<(), RedisQueueError> {
        let _: u64 = conn
            .xack(&self.stream_key, group, &[id])
            .map_err(|e| RedisQueueError::Command(format!("XACK failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait]
impl AuditLogQueue for RedisAuditLogQueue {
    async fn enqueue(&self, job: AuditLogJob) -> Result<(), QueueError> {
        let queue = self.clone();
        tokio::task::spawn_blocking(move || queue.publish_sync(&job))
            .await
            .map_err(|e| QueueError::Enqueue(format!("publish task failed: {}", e)))?
            .map_err(QueueError::from)
    }
}

/// One stream entry. `job` is `None` when the entry carried no payload.
#[derive(Debug)]
struct StreamEntry {
    id: String,
    job: Option<Result<AuditLogJob, String>>,
}

fn encode_job(job: &AuditLogJob) -> Result<[(&'static str, String); 2], RedisQueueError> {
    let payload = serde_json::to_string(job).map_err(|e| RedisQueueError::Serialization(e.to_string()))?;
    Ok([("type", job.kind().to_string()), ("payload", payload)])
}

fn decode_payload(payload: Option<&str>) -> Option<Result<AuditLogJob, String>> {
    payload.map(|p| serde_json::from_str::<AuditLogJob>(p).map_err(|e| e.to_string()))
}

/// Pending entries idle long enough to be retried.
fn stale_ids(pending: &[StreamPendingId], min_idle_ms: usize) -> Vec<String> {
    pending
        .iter()
        .filter(|entry| entry.last_delivered_ms >= min_idle_ms)
        .map(|entry| entry.id.clone())
        .collect()
}

/// Position of the next XREADGROUP.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReadCursor {
    /// Walking this consumer's pending list past the given id.
    Pending(String),
    /// Entries never delivered to the group (`>`).
    New,
}

impl ReadCursor {
    fn start() -> Self {
        ReadCursor::Pending("0".to_string())
    }

    fn id(&self) -> &str {
        match self {
            ReadCursor::Pending(id) => id,
            ReadCursor::New => ">",
        }
    }

    fn blocks(&self) -> bool {
        matches!(self, ReadCursor::New)
    }

    /// A pending walk moves past the last entry it read and ends on an empty batch.
    fn advance(self, last_id: Option<&str>) -> Self {
        match (self, last_id) {
            (ReadCursor::Pending(_), Some(id)) => ReadCursor::Pending(id.to_string()),
            (ReadCursor::Pending(_), None) | (ReadCursor::New, _) => ReadCursor::New,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntryOutcome {
    Written,
    Failed,
    Undecodable,
    Empty,
}

impl EntryOutcome {
    /// Only failed writes stay pending for a retry.
    fn acknowledges(self) -> bool {
        !matches!(self, EntryOutcome::Failed)
    }
}

fn handle_entry<F>(entry: StreamEntry, write: F) -> EntryOutcome
where
    F: FnOnce(AuditLogJob) -> Result<(), RepositoryError>,
{
    match entry.job {
        Some(Ok(job)) => match write(job) {
            Ok(()) => EntryOutcome::Written,
            Err(err) => {
                warn!(message_id = %entry.id, error = %err, "audit-log job failed; left pending");
                EntryOutcome::Failed
            }
        },
        Some(Err(err)) => {
            error!(message_id = %entry.id, error = %err, "dropping undecodable audit-log job");
            EntryOutcome::Undecodable
        }
        None => {
            debug!(message_id = %entry.id, "skipping audit-log entry without payload");
            EntryOutcome::Empty
        }
    }
}

#[derive(Debug)]
struct ReclaimSchedule {
    every: Duration,
    last: Option<Instant>,
}

impl ReclaimSchedule {
    fn new(every: Duration) -> Self {
        Self { every, last: None }
    }

    fn due(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.every => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Wait up to `wait`; true when shutdown was requested meanwhile.
fn pause(shutdown_rx: &mpsc::Receiver<()>, wait: Duration) -> bool {
    match shutdown_rx.recv_timeout(wait) {
        Ok(()) => true,
        Err(RecvTimeoutError::Timeout) => false,
        Err(RecvTimeoutError::Disconnected) => {
            thread::sleep(wait);
            false
        }
    }
}

/// Handle to stop and join the queue worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop. The worker
    /// notices within one XREADGROUP block interval.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Consumes the audit stream and writes jobs through the direct path.
#[derive(Debug)]
pub struct AuditLogQueueWorker;

impl AuditLogQueueWorker {
    /// Spawn the consumer thread. Must be called from within a Tokio runtime;
    /// writes are driven on that runtime.
    pub fn spawn(
        queue: RedisAuditLogQueue,
        trail: Arc<AuditTrail>,
        consumer: impl Into<String>,
    ) -> Result<WorkerHandle, RedisQueueError> {
        queue.ensure_consumer_group(DEFAULT_GROUP)?;

        let runtime = tokio::runtime::Handle::current();
        let consumer = consumer.into();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let join = thread::Builder::new()
            .name("audit-log-worker".to_string())
            .spawn(move || worker_loop(queue, trail, runtime, consumer, shutdown_rx))
            .map_err(|e| RedisQueueError::Connection(format!("failed to spawn worker thread: {}", e)))?;

        info!(group = DEFAULT_GROUP, "audit-log queue worker started");
        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn worker_loop(
    queue: RedisAuditLogQueue,
    trail: Arc<AuditTrail>,
    runtime: tokio::runtime::Handle,
    consumer: String,
    shutdown_rx: mpsc::Receiver<()>,
) {
    let mut cursor = ReadCursor::start();
    let mut reclaim = ReclaimSchedule::new(RECLAIM_INTERVAL);

    loop {
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        let mut conn = match queue.connection() {
            Ok(conn) => conn,
            Err(err) => {
                warn!(error = %err, "audit-log worker cannot reach Redis; retrying");
                if pause(&shutdown_rx, FAILURE_BACKOFF) {
                    break;
                }
                continue;
            }
        };

        if cursor == ReadCursor::New && reclaim.due(Instant::now()) {
            match queue.reclaim_stale_sync(&mut conn, DEFAULT_GROUP, &consumer) {
                Ok(0) => {}
                Ok(claimed) => {
                    info!(claimed, "retrying stale audit-log entries");
                    cursor = ReadCursor::start();
                }
                Err(err) => warn!(error = %err, "failed to reclaim stale audit-log entries"),
            }
        }

        let entries = match queue.read_group_sync(&mut conn, DEFAULT_GROUP, &consumer, &cursor) {
            Ok(entries) => entries,
            Err(err) => {
                error!(error = %err, "failed to read from audit-log stream");
                if pause(&shutdown_rx, FAILURE_BACKOFF) {
                    break;
                }
                continue;
            }
        };

        let last_id = entries.last().map(|entry| entry.id.clone());
        let mut failed = false;
        for entry in entries {
            let id = entry.id.clone();
            let outcome = handle_entry(entry, |job| runtime.block_on(trail.process_job(job)));
            if !outcome.acknowledges() {
                failed = true;
                continue;
            }
            if let Err(err) = queue.acknowledge_sync(&mut conn, DEFAULT_GROUP, &id) {
                error!(message_id = %id, error = %err, "failed to acknowledge audit-log job");
            }
        }
        cursor = cursor.advance(last_id.as_deref());

        if failed && pause(&shutdown_rx, FAILURE_BACKOFF) {
            break;
        }
    }

    debug!("audit-log queue worker stopped");
}
