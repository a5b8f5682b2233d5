//! Background Services Module
//!
//! Two periodic tasks keep the tracker healthy for the life of the process:
//!
//! - **StaleSweepService**: drops usage records unseen for longer than the
//!   configured expiry
//! - **FlushService**: persists the node's snapshots, and once more on
//!   shutdown
//!
//! Both run under a [`ServiceManager`] that owns the shutdown broadcast.
//!
//! # Example
//!
//! ```rust
//! use pqs_tracker::services::{ServiceConfig, ServiceManager};
//!
//! let manager = ServiceManager::new(ServiceConfig::default());
//! assert_eq!(manager.status().len(), 0);
//! ```

pub mod flush;
pub mod framework;
pub mod sweep;

use std::sync::Arc;

pub use flush::FlushService;
pub use framework::{
    Service, ServiceConfig, ServiceError, ServiceManager, ServiceStatus, SharedServiceManager,
};
pub use sweep::StaleSweepService;

use crate::config::Config;
use crate::tracker::PqsTracker;

/// Build a manager with the sweep and flush services registered
pub fn tracker_services(
    tracker: Arc<PqsTracker>,
    config: &Config,
) -> Result<SharedServiceManager, ServiceError> {
    let manager = ServiceManager::with_defaults();
    manager.register(Arc::new(StaleSweepService::from_tracker(tracker.clone())))?;
    manager.register(Arc::new(FlushService::new(
        tracker,
        config.persistence.flush_interval(),
    )))?;
    Ok(Arc::new(manager))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_tracker_services_lifecycle() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.persistence.data_dir = dir.path().to_path_buf();
        let tracker = Arc::new(PqsTracker::from_config(&config));

        let manager = tracker_services(tracker.clone(), &config).unwrap();
        assert_eq!(manager.status().len(), 2);

        manager.start_all().await.unwrap();
        assert!(manager.is_healthy());

        manager.shutdown().await.unwrap();
        assert_eq!(manager.service_status("flush"), Some(ServiceStatus::Stopped));
        assert_eq!(manager.service_status("stale_sweep"), Some(ServiceStatus::Stopped));
        assert!(tracker.node_dir().is_dir());
    }
}
