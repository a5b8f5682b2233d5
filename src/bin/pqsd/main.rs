//! PQS Tracker daemon
//!
//! Runs the query tracker of one search node: loads the node's snapshots,
//! runs the stale sweep and flush services, and serves the admin API.
//!
//! # CLI Commands
//!
//! - `start` - Start the admin server (default if no command specified)
//! - `check-config` - Validate configuration file
//! - `summary` - Load this node's snapshots and print the summary as JSON
//! - `merge-peers` - Merge peer snapshots into this node's state once and flush
//!
//! # Configuration
//!
//! The daemon reads configuration from:
//! 1. `--config` flag
//! 2. `PQS_CONFIG` environment variable (path to TOML file)
//! 3. `./pqs.toml` in current directory
//! 4. Default configuration
//!
//! Environment overrides (`PQS_DATA_DIR`, `PQS_HOST_ID`, ...) apply on top.

use clap::{Parser, Subcommand};
use pqs_tracker::{
    admin::{self, AdminState},
    metrics,
    services::tracker_services,
    Config, PqsTracker,
};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tokio::signal;
use tracing::{debug, info, warn};

// =============================================================================
// CLI Definition
// =============================================================================

/// Persistent query surfacing tracker
#[derive(Parser)]
#[command(name = "pqsd")]
#[command(version)]
#[command(about = "Tracks query usage and recommends columns to pre-compute", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to configuration file (overrides PQS_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override listen address (e.g., 0.0.0.0:5122)
    #[arg(short, long, global = true)]
    listen: Option<String>,

    /// Override data directory path
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the admin server (default)
    Start,

    /// Validate configuration file without starting the server
    CheckConfig,

    /// Print this node's summary without starting the server
    Summary,

    /// Merge peer snapshots once, then flush
    MergePeers,
}

// =============================================================================
// Configuration Loading
// =============================================================================

fn load_config(cli: &Cli) -> Result<Config, Box<dyn std::error::Error>> {
    let path = cli
        .config
        .clone()
        .or_else(|| std::env::var("PQS_CONFIG").ok().map(PathBuf::from))
        .or_else(|| {
            let local = PathBuf::from("pqs.toml");
            local.is_file().then_some(local)
        });

    let mut config = match path {
        Some(path) => Config::from_file_with_env(&path.to_string_lossy())?,
        None => Config::from_env(),
    };

    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen.clone();
    }
    if let Some(data_dir) = &cli.data_dir {
        config.persistence.data_dir = data_dir.clone();
    }

    config.validate()?;
    Ok(config)
}

fn load_tracker(config: &Config) -> Arc<PqsTracker> {
    let tracker = PqsTracker::from_config(config);
    tracker.load();
    Arc::new(tracker)
}

// =============================================================================
// CLI Command Handlers
// =============================================================================

/// Validate configuration and print summary
fn cmd_check_config(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(cli)?;

    println!("Configuration is valid!");
    println!();
    println!("Tracker Settings:");
    println!("  Enabled: {}", config.tracker.enabled);
    println!("  Candidate capacity: {}", config.tracker.max_candidate_queries);
    println!("  Promotion window: {}", config.tracker.max_queries_to_track);
    println!("  Stale expiry: {}s", config.tracker.stale_expiry_secs);
    println!();
    println!("Persistence:");
    println!("  Data directory: {:?}", config.persistence.data_dir);
    println!("  Host id: {}", config.persistence.host_id);
    println!("  Flush interval: {}s", config.persistence.flush_interval_secs);
    println!();
    println!("Server:");
    println!("  Listen address: {}", config.server.listen_addr);
    println!("  Log level: {}", config.monitoring.log_level);

    Ok(())
}

/// Print the node summary as JSON
fn cmd_summary(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(cli)?;
    let tracker = load_tracker(&config);
    println!("{}", serde_json::to_string_pretty(&tracker.summary())?);
    Ok(())
}

/// Merge peer snapshots and flush the result
fn cmd_merge_peers(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(cli)?;
    let tracker = load_tracker(&config);
    let merged = tracker.merge_peers();
    tracker.flush()?;
    println!("Merged {} peer snapshot files", merged);
    println!("{}", serde_json::to_string_pretty(&tracker.summary())?);
    Ok(())
}

// =============================================================================
// Server
// =============================================================================

/// Graceful shutdown signal handler
///
/// Signal registration failures are logged and the handler waits forever.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(
                error = %e,
                "Ctrl+C handler installation failed - graceful shutdown unavailable"
            );
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(e) => {
                warn!(
                    error = %e,
                    "SIGTERM handler installation failed - SIGTERM shutdown unavailable"
                );
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn cmd_start(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(cli)?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.monitoring.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!("Starting PQS tracker v{}", env!("CARGO_PKG_VERSION"));
    debug!(
        listen_addr = %config.server.listen_addr,
        data_dir = ?config.persistence.data_dir,
        host_id = %config.persistence.host_id,
        "Configuration loaded"
    );

    if config.monitoring.metrics_enabled {
        metrics::init();
    }

    let tracker = load_tracker(&config);
    let merged = tracker.merge_peers();
    info!(
        searches = tracker.tracked_searches(),
        aggs = tracker.tracked_aggregations(),
        peer_files = merged,
        "Tracker state restored"
    );

    let services = tracker_services(tracker.clone(), &config)?;
    services.start_all().await?;

    let state = Arc::new(AdminState {
        tracker,
        services: Some(services.clone()),
    });
    let app = admin::router(state, &config.server.cors_allowed_origins);

    let addr: SocketAddr = config.server.listen_addr.parse()?;
    info!("Admin server listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stops the sweep and runs the final flush
    services.shutdown().await?;

    info!("Server shutdown complete");
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::CheckConfig) => cmd_check_config(&cli),
        Some(Commands::Summary) => cmd_summary(&cli),
        Some(Commands::MergePeers) => cmd_merge_peers(&cli),
        Some(Commands::Start) | None => cmd_start(&cli).await,
    }
}
