//! ledgerkv - An In-Memory Key-Value Server with an Append-Only Log
//!
//! This is the main entry point for the ledgerkv server.
//! It replays the append-only log, sets up the storage engine, the expiry
//! sweeper and the TCP listener, and tears them down in order on Ctrl+C.

use anyhow::Context;
use clap::Parser;
use ledgerkv::persistence::AppendOnlyLog;
use ledgerkv::storage::{ExpirySweeper, StorageEngine};
use ledgerkv::{server, CommandHandler, Config, ConnectionStats};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn print_banner(config: &Config) {
    println!(
        r#"
ledgerkv v{} - In-Memory Key-Value Server
──────────────────────────────────────────────────────────────
Listening on    {}
Append-only log {}

Use Ctrl+C to shutdown gracefully.
"#,
        ledgerkv::VERSION,
        config.bind_address(),
        config
            .aof_path()
            .map_or_else(|| "disabled".to_string(), |p| p.display().to_string()),
    );
}

/// Rebuilds the store from the log at `path`.
fn replay(storage: &StorageEngine, path: &Path) -> anyhow::Result<()> {
    let loaded = AppendOnlyLog::read_records(path)
        .with_context(|| format!("failed to read append-only log {}", path.display()))?;

    for skipped in &loaded.skipped {
        warn!(error = %skipped, "Skipped unreadable log record");
    }

    let stats = storage.restore(loaded.records);
    info!(
        path = %path.display(),
        applied = stats.applied,
        expired = stats.expired,
        invalid = stats.invalid,
        skipped = loaded.skipped.len(),
        keys = storage.len(),
        "Replayed append-only log"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command-line arguments
    let config = Config::parse();

    // Set up logging; RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .with_context(|| format!("invalid log level '{}'", config.log_level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Rebuild the store before the log is attached so replay is not re-logged
    let mut storage = StorageEngine::new();
    let log = match config.aof_path() {
        Some(path) => {
            if config.no_replay {
                info!("Log replay disabled, starting empty");
            } else {
                replay(&storage, path)?;
            }
            let log = AppendOnlyLog::open(path, config.fsync)
                .with_context(|| format!("failed to open append-only log {}", path.display()))?;
            Some(Arc::new(log))
        }
        None => {
            info!("Append-only log disabled");
            None
        }
    };
    if let Some(log) = &log {
        storage = storage.with_log(Arc::clone(log));
    }
    let storage = Arc::new(storage);
    info!("Storage engine initialized with 64 shards");

    // Start the background expiry sweeper
    let sweeper = ExpirySweeper::start(Arc::clone(&storage), config.expiry());

    // Bind the TCP listener
    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("failed to bind {}", config.bind_address()))?;
    info!("Listening on {}", config.bind_address());
    print_banner(&config);

    let handler = CommandHandler::new(Arc::clone(&storage))
        .with_default_ttl(config.default_ttl())
        .with_strict_durability(config.strict_durability);
    let stats = Arc::new(ConnectionStats::new());

    // Set up graceful shutdown
    let shutdown = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
        info!("Shutdown signal received, stopping server...");
    };

    server::run(
        listener,
        handler,
        Arc::clone(&stats),
        config.idle_timeout(),
        shutdown,
    )
    .await;

    // The sweeper stops before the log is flushed for the last time
    sweeper.shutdown().await;
    if let Some(log) = &log {
        log.sync().context("failed to sync append-only log")?;
    }

    info!(
        connections = stats.connections_accepted.load(Ordering::Relaxed),
        commands = stats.commands_processed.load(Ordering::Relaxed),
        bytes_read = stats.bytes_read.load(Ordering::Relaxed),
        bytes_written = stats.bytes_written.load(Ordering::Relaxed),
        keys = storage.len(),
        "Server shutdown complete"
    );
    Ok(())
}
