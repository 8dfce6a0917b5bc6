use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::AuditLogJob;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("enqueue failed: {0}")]
    Enqueue(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Asynchronous transport for audit jobs.
#[async_trait]
pub trait AuditLogQueue: Send + Sync {
    /// Whether the producer currently holds a usable connection.
    fn is_ready(&self) -> bool {
        true
    }

    async fn enqueue(&self, job: AuditLogJob) -> Result<(), QueueError>;
}

/// Channel-backed queue; the receiving half plays the worker.
#[derive(Debug)]
pub struct InMemoryAuditLogQueue {
    tx: mpsc::UnboundedSender<AuditLogJob>,
    ready: AtomicBool,
}

impl InMemoryAuditLogQueue {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AuditLogJob>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                ready: AtomicBool::new(true),
            },
            rx,
        )
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }
}

#[async_trait]
impl AuditLogQueue for InMemoryAuditLogQueue {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    async fn enqueue(&self, job: AuditLogJob) -> Result<(), QueueError> {
        self.tx
            .send(job)
            .map_err(|_| QueueError::Unavailable("receiver dropped".to_string()))
    }
}
