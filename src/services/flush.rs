//! Snapshot Flush Service
//!
//! Writes the tracker's snapshots to disk on a fixed period and once more
//! when shutdown is requested. File writes run on the blocking pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant};

use super::framework::{Service, ServiceError, ServiceStatus};
use crate::tracker::PqsTracker;

/// Background service persisting tracker state
pub struct FlushService {
    tracker: Arc<PqsTracker>,
    interval: Duration,
    status: RwLock<ServiceStatus>,
    flushes: AtomicU64,
    failures: AtomicU64,
}

impl FlushService {
    /// Flush `tracker` every `interval`
    pub fn new(tracker: Arc<PqsTracker>, interval: Duration) -> Self {
        Self {
            tracker,
            interval,
            status: RwLock::new(ServiceStatus::Stopped),
            flushes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    /// Flush one snapshot set on the blocking pool
    pub async fn flush_once(&self) -> Result<(), ServiceError> {
        let tracker = self.tracker.clone();
        let result = tokio::task::spawn_blocking(move || tracker.flush())
            .await
            .map_err(|e| ServiceError::RuntimeError(format!("flush task failed: {}", e)))?;

        match result {
            Ok(()) => {
                self.flushes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            },
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                Err(ServiceError::RuntimeError(e.to_string()))
            },
        }
    }

    /// Successful flushes
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Failed flushes
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Service for FlushService {
    async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError> {
        *self.status.write() = ServiceStatus::Running;
        tracing::debug!(interval_secs = self.interval.as_secs(), "Flush service started");

        // First tick is one period out so an unloaded tracker never
        // overwrites the snapshots at startup
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);

        loop {
            tokio::select! {
                result = shutdown.recv() => {
                    match result {
                        Ok(()) | Err(broadcast::error::RecvError::Closed) => {
                            tracing::debug!("Flush service received shutdown signal");
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::debug!(missed = n, "Flush broadcast receiver lagged");
                        }
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.flush_once().await {
                        tracing::error!(error = %e, "Periodic flush failed");
                    }
                }
            }
        }

        *self.status.write() = ServiceStatus::Stopping;
        let result = self.flush_once().await;
        if let Err(e) = &result {
            tracing::warn!(error = %e, "Final flush failed");
        }

        *self.status.write() = ServiceStatus::Stopped;
        tracing::debug!("Flush service stopped");
        result
    }

    fn name(&self) -> &'static str {
        "flush"
    }

    fn status(&self) -> ServiceStatus {
        self.status.read().clone()
    }
}
