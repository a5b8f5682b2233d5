//! Stale Sweep Service
//!
//! Periodically drops query shapes that have not been seen for longer than
//! the configured expiry. Capacity eviction happens inline on insert; this
//! sweep only handles age.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant};

use super::framework::{Service, ServiceError, ServiceStatus};
use crate::tracker::PqsTracker;

/// Background service removing stale usage records
pub struct StaleSweepService {
    tracker: Arc<PqsTracker>,
    interval: Duration,
    status: RwLock<ServiceStatus>,
    sweeps: AtomicU64,
    removed: AtomicU64,
}

impl StaleSweepService {
    /// Sweep `tracker` every `interval`
    pub fn new(tracker: Arc<PqsTracker>, interval: Duration) -> Self {
        Self {
            tracker,
            interval,
            status: RwLock::new(ServiceStatus::Stopped),
            sweeps: AtomicU64::new(0),
            removed: AtomicU64::new(0),
        }
    }

    /// Sweep at the tracker's configured interval
    pub fn from_tracker(tracker: Arc<PqsTracker>) -> Self {
        let interval = tracker.config().stale_sweep_interval();
        Self::new(tracker, interval)
    }

    /// Run one sweep now
    pub fn sweep_once(&self) -> usize {
        let removed = self.tracker.remove_stale_entries();
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.removed.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Completed sweeps
    pub fn sweep_count(&self) -> u64 {
        self.sweeps.load(Ordering::Relaxed)
    }

    /// Records removed across all sweeps
    pub fn removed_count(&self) -> u64 {
        self.removed.load(Ordering::Relaxed)
    }
}

#[async_trait::async_trait]
impl Service for StaleSweepService {
    async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError> {
        *self.status.write() = ServiceStatus::Running;
        tracing::debug!(interval_secs = self.interval.as_secs(), "Stale sweep service started");

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);

        loop {
            tokio::select! {
                result = shutdown.recv() => {
                    match result {
                        Ok(()) | Err(broadcast::error::RecvError::Closed) => {
                            tracing::debug!("Stale sweep service received shutdown signal");
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::debug!(missed = n, "Stale sweep broadcast receiver lagged");
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.sweep_once();
                }
            }
        }

        *self.status.write() = ServiceStatus::Stopped;
        tracing::debug!("Stale sweep service stopped");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stale_sweep"
    }

    fn status(&self) -> ServiceStatus {
        self.status.read().clone()
    }
}
