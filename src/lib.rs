//! PQS Tracker - persistent query surfacing for an observability search engine
//!
//! This library watches the queries a search node executes and:
//! - Reduces each search predicate and aggregation pipeline to a canonical id
//! - Ranks the distinct shapes by cluster-wide usage in bounded registries
//! - Tells the planner which shapes are promoted for a table
//! - Recommends group-by, measure and sort columns to pre-compute
//! - Persists its state per node and merges the state of peer nodes

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod catalog;
pub mod error;
pub mod hasher;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Search and aggregation descriptors handed over by the query parser
pub mod query;

/// Usage registries, persistence and column recommendations
pub mod tracker;

/// Background services for stale sweeps and periodic flushes
/// Provides service lifecycle management and graceful shutdown
pub mod services;

/// Admin HTTP router
pub mod admin;

// Re-export main types
pub use config::Config;
pub use error::{Error, Result};
pub use hasher::Pqid;
pub use tracker::PqsTracker;
