//! vfs-publisher: runs the asynchronous publish queue against PostgreSQL.
//!
//! Environment variables:
//!   DATABASE_URL                   - connection string (overridden by --database-url)
//!   DATABASE_MAX_CONNECTIONS       - pool size
//!   DATABASE_CONNECT_TIMEOUT_SECS  - pool connect timeout
//!   PUBLISH_HISTORY_SIZE           - publish history entries kept (default 10)
//!   PUBLISH_WORKER_ENABLED         - "false" or "0" disables the worker
//!   PUBLISH_POLL_INTERVAL_MS       - idle polling interval
//!   PUBLISH_JOB_TIMEOUT_SECS       - timeout of a single publish
//!   LOG_FORMAT                     - "json" or "text" (default: "text")
//!   LOG_FILE                       - path to log file (optional, enables file logging)
//!   RUST_LOG                       - standard env filter

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vfs_db::{Database, PoolConfig};
use vfs_jobs::{EventBus, PublishBackend, PublishConfig, WorkerConfig};

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/vfs";

#[derive(Parser)]
#[command(name = "vfs-publisher")]
#[command(author, version, about = "Publish queue worker for the offline/online VFS")]
struct Cli {
    /// Database connection string (default: $DATABASE_URL)
    #[arg(long)]
    database_url: Option<String>,

    /// Run pending migrations before starting
    #[arg(long)]
    migrate: bool,

    /// Apply an upgrade script best-effort before starting
    #[arg(long, value_name = "FILE")]
    upgrade: Option<PathBuf>,

    /// Publish history entries to keep (default: $PUBLISH_HISTORY_SIZE or 10)
    #[arg(long)]
    history_size: Option<usize>,
}

/// Keeps the file writer alive for the life of the process.
type LogGuard = Option<tracing_appender::non_blocking::WorkerGuard>;

fn init_logging() -> LogGuard {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_file = std::env::var("LOG_FILE").ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "vfs_jobs=info,vfs_db=info,vfs_publisher=info".into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let guard = if let Some(ref path) = log_file {
        let file_dir = Path::new(path).parent().unwrap_or(Path::new("."));
        let file_name = Path::new(path)
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("vfs-publisher.log");
        let file_appender = tracing_appender::rolling::daily(file_dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        if log_format == "json" {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(non_blocking),
                )
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false),
                )
                .init();
        }
        Some(guard)
    } else {
        if log_format == "json" {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        } else {
            registry.with(tracing_subscriber::fmt::layer()).init();
        }
        None
    };

    info!(
        log_format = %log_format,
        log_file = log_file.as_deref().unwrap_or("(stdout)"),
        "Logging initialized"
    );
    guard
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let _log_guard = init_logging();
    let cli = Cli::parse();

    let database_url = cli
        .database_url
        .or_else(|| std::env::var("DATABASE_URL").ok())
        .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

    let mut publish_config = PublishConfig::from_env()?;
    if let Some(size) = cli.history_size {
        publish_config = publish_config.with_history_size(size)?;
    }
    let worker_config = WorkerConfig::from_env();

    info!("Connecting to database...");
    let db = Database::connect_with_config(&database_url, PoolConfig::from_env()?).await?;
    info!("Database connected");

    if cli.migrate {
        info!("Running database migrations...");
        db.migrate().await?;
        info!("Database migrations complete");
    }

    if let Some(ref path) = cli.upgrade {
        let script = std::fs::read_to_string(path)
            .with_context(|| format!("reading upgrade script {}", path.display()))?;
        let report = db.upgrade(&script).await;
        if report.is_clean() {
            info!(applied = report.applied, "Upgrade script applied");
        } else {
            warn!(
                applied = report.applied,
                failed = report.failed.len(),
                "Upgrade script applied with failures"
            );
        }
    }

    let event_bus = EventBus::default();
    let mut events = event_bus.subscribe();
    tokio::spawn(async move {
        while let Ok(envelope) = events.recv().await {
            match serde_json::to_string(&envelope) {
                Ok(json) => debug!(event = %json, "Publish event"),
                Err(e) => warn!(error = %e, "Failed to serialize publish event"),
            }
        }
    });

    let (_manager, worker) = PublishBackend::postgres(&db).start(
        worker_config,
        publish_config.history_size,
        Some(event_bus),
    );
    info!(
        history_size = publish_config.history_size,
        "Publish worker running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutting down publish worker");
    worker.shutdown().await?;
    db.pool().close().await;
    Ok(())
}
