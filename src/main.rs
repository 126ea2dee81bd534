//! Sprint Storage Daemon
//!
//! ## Usage
//!
//! ```bash
//! # Start with defaults
//! sprint-storage
//!
//! # Start with custom config
//! sprint-storage --config /path/to/config.toml
//!
//! # Custom port and storage directory, JSON logs
//! sprint-storage --http-port 9000 --storage-dir /data/sprints --log-json
//! ```

use anyhow::Context;
use clap::Parser;
use sprint_storage::{Api, Config, HttpServer, SprintDb};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sprint-storage")]
#[command(about = "Sprint-planning storage daemon")]
struct Args {
    /// Path to config file
    #[arg(short, long, env = "SPRINT_STORAGE_CONFIG")]
    config: Option<PathBuf>,

    /// Storage directory
    #[arg(long, env = "SPRINT_STORAGE_DIR")]
    storage_dir: Option<PathBuf>,

    /// HTTP API port
    #[arg(long, env = "SPRINT_STORAGE_HTTP_PORT")]
    http_port: Option<u16>,

    /// Emit logs as JSON lines
    #[arg(long, env = "SPRINT_STORAGE_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::from_default_env().add_directive("sprint_storage=info".parse()?);
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Load config
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => Config::default(),
    };

    // Apply CLI overrides
    if let Some(dir) = args.storage_dir {
        config.storage_dir = dir;
    }
    if let Some(port) = args.http_port {
        config.http_port = port;
    }
    config.validate()?;

    info!(
        storage_dir = %config.storage_dir.display(),
        http_port = config.http_port,
        "Starting sprint-storage"
    );

    // Ensure storage directory exists
    tokio::fs::create_dir_all(&config.storage_dir).await?;

    // Save default config if it doesn't exist
    let config_path = config.config_path();
    if args.config.is_none() && !config_path.exists() {
        config.save(&config_path)?;
        info!(path = %config_path.display(), "Created default config");
    }

    let db = Arc::new(
        SprintDb::open(&config.storage_dir, Duration::from_millis(config.busy_timeout_ms))
            .context("opening database")?,
    );
    let config = Arc::new(config);
    let api = Arc::new(Api::new(db.clone(), config.clone()));

    // Expired idempotency records
    let purge_api = api.clone();
    let purge_every = Duration::from_secs(config.idempotency_purge_interval_secs.max(1));
    let purge_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_every);
        loop {
            interval.tick().await;
            let api = purge_api.clone();
            match tokio::task::spawn_blocking(move || api.purge_expired_idempotency()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => warn!(error = %e, "Idempotency purge failed"),
                Err(e) => error!(error = %e, "Idempotency purge task panicked"),
            }
        }
    });

    let http_addr: SocketAddr = format!("{}:{}", config.bind_address, config.http_port)
        .parse()
        .context("parsing bind address")?;
    let http_server = Arc::new(HttpServer::new(api.clone(), http_addr));

    info!("HTTP API available at http://{}", http_addr);
    info!("Press Ctrl+C to stop.");

    // Handle shutdown signal
    let shutdown = async {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutting down...");
    };

    tokio::select! {
        result = http_server.run() => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
        }
        _ = shutdown => {}
    }

    purge_handle.abort();

    // Print stats before exit
    if let Ok(stats) = db.stats() {
        info!(
            projects = stats.project_count,
            stories = stats.story_count,
            dependencies = stats.dependency_count,
            audit_events = stats.audit_event_count,
            idempotency_records = stats.idempotency_record_count,
            "Final storage stats"
        );
    }

    Ok(())
}
