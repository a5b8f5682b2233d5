//! Configuration management for the PQS tracker
//!
//! TOML file support, environment variable overrides and sensible defaults.

use crate::error::{Error, Result, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Tracking, promotion and recommendation limits
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// On-disk snapshot location and flush cadence
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Admin HTTP server
    #[serde(default)]
    pub server: ServerConfig,

    /// Monitoring and observability
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Tracker configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TrackerConfig {
    /// PQS enable flag; when off nothing is recorded and nothing is promoted
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Upper bound on distinct query shapes tracked per registry
    #[serde(default = "default_max_candidate_queries")]
    pub max_candidate_queries: usize,

    /// Promotion window: how many of the most used shapes are promoted
    #[serde(default = "default_max_queries_to_track")]
    pub max_queries_to_track: usize,

    /// Cap on recommended group-by columns
    #[serde(default = "default_max_num_groupby_cols")]
    pub max_num_groupby_cols: usize,

    /// Cap on recommended sort columns
    #[serde(default = "default_max_sort_cols")]
    pub max_sort_cols: usize,

    /// Records unseen for longer than this are swept
    #[serde(default = "default_stale_expiry_secs")]
    pub stale_expiry_secs: u64,

    /// Period of the staleness sweep
    #[serde(default = "default_stale_sweep_interval_secs")]
    pub stale_sweep_interval_secs: u64,

    /// Timestamp column of the engine, never recommended as a group-by
    #[serde(default = "default_timestamp_key")]
    pub timestamp_key: String,
}

/// Persistence configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PersistenceConfig {
    /// Root data directory; snapshots live under `querynodes/<host_id>/pqueries/`
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Identity of this node in a multi-node deployment
    #[serde(default = "default_host_id")]
    pub host_id: String,

    /// Period of the snapshot flush
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,
}

/// Admin server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Listen address for the admin API
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
}

/// Monitoring configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Serve Prometheus metrics at /metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

// Default value functions
fn default_true() -> bool { true }
fn default_max_candidate_queries() -> usize { 10_000 }
fn default_max_queries_to_track() -> usize { 100 }
fn default_max_num_groupby_cols() -> usize { 10 }
fn default_max_sort_cols() -> usize { 10 }
fn default_stale_expiry_secs() -> u64 { 3 * 24 * 3600 }
fn default_stale_sweep_interval_secs() -> u64 { 1800 }
fn default_timestamp_key() -> String { "timestamp".to_string() }
fn default_data_dir() -> PathBuf { PathBuf::from("data/") }
fn default_flush_interval_secs() -> u64 { 120 }
fn default_listen_addr() -> String { "0.0.0.0:5122".to_string() }
fn default_log_level() -> String { "info".to_string() }

fn default_host_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.trim().is_empty())
        .unwrap_or_else(|| "node-0".to_string())
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_candidate_queries: default_max_candidate_queries(),
            max_queries_to_track: default_max_queries_to_track(),
            max_num_groupby_cols: default_max_num_groupby_cols(),
            max_sort_cols: default_max_sort_cols(),
            stale_expiry_secs: default_stale_expiry_secs(),
            stale_sweep_interval_secs: default_stale_sweep_interval_secs(),
            timestamp_key: default_timestamp_key(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            host_id: default_host_id(),
            flush_interval_secs: default_flush_interval_secs(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            cors_allowed_origins: Vec::new(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            metrics_enabled: true,
        }
    }
}

impl TrackerConfig {
    /// Staleness threshold as a duration
    pub fn stale_expiry(&self) -> Duration {
        Duration::from_secs(self.stale_expiry_secs)
    }

    /// Sweep period as a duration
    pub fn stale_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.stale_sweep_interval_secs)
    }
}

impl PersistenceConfig {
    /// Flush period as a duration
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }

    /// Directory holding this node's snapshot files
    pub fn node_dir(&self) -> PathBuf {
        self.data_dir
            .join("querynodes")
            .join(&self.host_id)
            .join("pqueries")
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("Failed to read config file {}: {}", path, e)))?;

        toml::from_str(&contents)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file {}: {}", path, e)))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        // Tracker
        if let Ok(enabled) = std::env::var("PQS_ENABLED") {
            if let Ok(v) = enabled.parse() {
                self.tracker.enabled = v;
            }
        }
        if let Ok(window) = std::env::var("PQS_MAX_QUERIES_TO_TRACK") {
            if let Ok(v) = window.parse() {
                self.tracker.max_queries_to_track = v;
            }
        }

        // Persistence
        if let Ok(data_dir) = std::env::var("PQS_DATA_DIR") {
            self.persistence.data_dir = PathBuf::from(data_dir);
        }
        if let Ok(host_id) = std::env::var("PQS_HOST_ID") {
            self.persistence.host_id = host_id;
        }

        // Server
        if let Ok(addr) = std::env::var("PQS_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }

        // Monitoring
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.monitoring.log_level = log_level;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let t = &self.tracker;

        if t.max_candidate_queries == 0 {
            return Err(ValidationError::OutOfRange {
                field: "tracker.max_candidate_queries".to_string(),
                value: "0".to_string(),
                min: "1".to_string(),
                max: usize::MAX.to_string(),
            }
            .into());
        }
        if t.max_queries_to_track == 0 || t.max_queries_to_track > t.max_candidate_queries {
            return Err(ValidationError::OutOfRange {
                field: "tracker.max_queries_to_track".to_string(),
                value: t.max_queries_to_track.to_string(),
                min: "1".to_string(),
                max: t.max_candidate_queries.to_string(),
            }
            .into());
        }
        if t.stale_sweep_interval_secs == 0 {
            return Err(Error::Configuration(
                "Stale sweep interval must be > 0".to_string(),
            ));
        }
        if t.timestamp_key.is_empty() {
            return Err(ValidationError::MissingField("tracker.timestamp_key".to_string()).into());
        }

        let p = &self.persistence;
        if p.host_id.trim().is_empty() {
            return Err(ValidationError::MissingField("persistence.host_id".to_string()).into());
        }
        if p.host_id.contains('/') || p.host_id.contains('\\') || p.host_id == ".." {
            return Err(Error::Configuration(format!(
                "Host id {:?} must be a plain directory name",
                p.host_id
            )));
        }
        if p.data_dir.as_os_str().is_empty() {
            return Err(Error::Configuration("Data directory cannot be empty".to_string()));
        }
        if p.flush_interval_secs == 0 {
            return Err(Error::Configuration("Flush interval must be > 0".to_string()));
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)
            .map_err(|e| Error::Configuration(format!("Failed to write config file {}: {}", path, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.tracker.enabled);
        assert_eq!(config.tracker.max_candidate_queries, 10_000);
        assert_eq!(config.tracker.max_queries_to_track, 100);
        assert_eq!(config.tracker.stale_expiry_secs, 259_200);
        assert_eq!(config.persistence.flush_interval_secs, 120);
    }

    #[test]
    fn test_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_window_larger_than_capacity_rejected() {
        let mut config = Config::default();
        config.tracker.max_candidate_queries = 10;
        config.tracker.max_queries_to_track = 11;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_host_id_must_be_plain_name() {
        let mut config = Config::default();
        config.persistence.host_id = "../etc".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [tracker]
            max_queries_to_track = 5

            [persistence]
            host_id = "qn-1"
            "#,
        )
        .unwrap();
        assert_eq!(config.tracker.max_queries_to_track, 5);
        assert_eq!(config.tracker.max_candidate_queries, 10_000);
        assert_eq!(config.persistence.host_id, "qn-1");
        assert!(config
            .persistence
            .node_dir()
            .ends_with("querynodes/qn-1/pqueries"));
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("PQS_HOST_ID", "env-node");
        let config = Config::from_env();
        assert_eq!(config.persistence.host_id, "env-node");
        std::env::remove_var("PQS_HOST_ID");
    }
}
