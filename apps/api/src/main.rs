//! # WashPass API Server
//!
//! Boots the engine, the background task worker and the HTTP listener.
//!
//! ## Startup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. Tracing (RUST_LOG, default info)                                    │
//! │  2. WashpassConfig::load (defaults → TOML → WASHPASS_* env)             │
//! │  3. Database::new (pool + migrations)                                   │
//! │  4. WashPass::with_defaults (HTTP gateway, QR renderer, DB sink)        │
//! │  5. TaskWorker spawned                                                  │
//! │  6. axum::serve until SIGINT / SIGTERM                                  │
//! │  7. Worker stopped, pool closed                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use washpass_db::{Database, DbConfig};
use washpass_engine::{WashPass, WashpassConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Starting WashPass API...");

    let config_path = std::env::var_os("WASHPASS_CONFIG").map(PathBuf::from);
    let config = WashpassConfig::load(config_path).context("loading configuration")?;
    info!(
        bind_addr = %config.server.bind_addr,
        database = %config.database.path,
        gateway_configured = config.gateway.is_configured(),
        "Configuration loaded"
    );

    // An in-memory database lives on a single connection
    let db_config = if config.database.path == ":memory:" {
        DbConfig::in_memory()
    } else {
        DbConfig::new(&config.database.path)
            .max_connections(config.database.max_connections)
            .busy_timeout(Duration::from_millis(config.database.busy_timeout_ms))
    };
    let db = Database::new(db_config)
        .await
        .context("opening database")?;
    info!("Database ready");

    let service = WashPass::with_defaults(db.clone(), config.clone())
        .context("wiring engine collaborators")?;

    let (worker, worker_handle) = service.worker();
    let worker_task = tokio::spawn(worker.run());

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.server.bind_addr))?;
    info!(addr = %config.server.bind_addr, "HTTP server listening");

    axum::serve(listener, washpass_api::router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    if let Err(e) = worker_handle.shutdown().await {
        warn!("Task worker already stopped: {}", e);
    }
    if let Err(e) = worker_task.await {
        warn!("Task worker ended abnormally: {}", e);
    }
    db.close().await;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,washpass_engine=debug,sqlx=warn"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
