//! Periodic retention pruning.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{AuditLogSettings, AuditTrail};

/// Starts the prune timer.
pub struct RetentionScheduler;

/// Running prune timer. Dropping the handle leaves the task running until the
/// runtime shuts down; call [`RetentionHandle::shutdown`] to stop it.
#[derive(Debug)]
pub struct RetentionHandle {
    shutdown: oneshot::Sender<()>,
    join: JoinHandle<()>,
    passes: Arc<AtomicU64>,
}

/// Clears the running flag when a pass ends, including by panic.
struct PassGuard(Arc<AtomicBool>);

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl RetentionScheduler {
    /// `None` when pruning is disabled. The first pass runs one full interval
    /// after startup. A tick that finds the previous pass still running is
    /// skipped.
    pub fn spawn(trail: Arc<AuditTrail>, settings: &AuditLogSettings) -> Option<RetentionHandle> {
        if !settings.prune_enabled {
            info!("audit-log retention pruning disabled");
            return None;
        }

        let period = Duration::from_secs(u64::from(settings.prune_interval_minutes.max(1)) * 60);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let running = Arc::new(AtomicBool::new(false));
        let passes = Arc::new(AtomicU64::new(0));
        let completed = passes.clone();

        info!(
            interval_minutes = settings.prune_interval_minutes,
            retention_days = trail.retention_days(),
            "audit-log retention pruning scheduled"
        );

        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut in_flight: Option<JoinHandle<()>> = None;

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if running
                            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                            .is_err()
                        {
                            debug!("previous retention pass still running; skipping tick");
                            continue;
                        }

                        let guard = PassGuard(running.clone());
                        let trail = trail.clone();
                        let completed = completed.clone();
                        in_flight = Some(tokio::spawn(async move {
                            let _guard = guard;
                            trail.purge_expired_http_logs().await;
                            completed.fetch_add(1, Ordering::Relaxed);
                        }));
                    }
                }
            }

            if let Some(pass) = in_flight {
                if let Err(err) = pass.await {
                    warn!(error = %err, "retention pass ended abnormally");
                }
            }
            debug!("audit-log retention timer stopped");
        });

        Some(RetentionHandle {
            shutdown: shutdown_tx,
            join,
            passes,
        })
    }
}

impl RetentionHandle {
    /// Number of prune passes that ran to completion.
    pub fn completed_passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    /// Stop the timer and wait for an in-flight pass to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(err) = self.join.await {
            warn!(error = %err, "retention task ended abnormally");
        }
    }
}
