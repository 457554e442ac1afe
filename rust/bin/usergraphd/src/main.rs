//! `usergraphd`: the follower-graph server binary.
//!
//! Usage:
//!   usergraphd -c <context-name-or-path> [--listen <addr>]
//!
//! The context name resolves to `/etc/usergraph/<name>.toml`.
//! If a path with `/` or `.` is given, it's used directly.

mod config;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use following::FollowingModule;
use following::emitter::{HttpEmitter, LogEmitter, NotificationEmitter};
use following::worker::DispatcherConfig;
use usergraph_core::{Module, ServiceConfig, UserDirectory};
use usergraph_sql::{SQLStore, SqliteStore};

use config::{NotificationsConfig, ServerConfig};

/// Follower-graph server.
#[derive(Parser, Debug)]
#[command(name = "usergraphd", about = "User and follower-graph server")]
struct Cli {
    /// Context name or path to config file.
    #[arg(short = 'c', long = "config", required = true)]
    config: String,

    /// Listen address (overrides default 0.0.0.0:8080).
    #[arg(long = "listen", default_value = "0.0.0.0:8080")]
    listen: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();

    // Load server configuration.
    let config_path = ServerConfig::resolve_path(&cli.config);
    info!("Loading configuration from {}", config_path.display());
    let server_config = ServerConfig::load(&config_path)?;
    server_config.verify()?;

    // Initialize storage.
    let data_dir = PathBuf::from(&server_config.storage.data_dir);
    std::fs::create_dir_all(&data_dir)?;

    let core_config = ServiceConfig {
        data_dir: Some(data_dir),
        listen: cli.listen.clone(),
        ..Default::default()
    };

    let sql: Arc<dyn SQLStore> = Arc::new(
        SqliteStore::open(&core_config.resolve_sqlite_path())
            .map_err(|e| anyhow::anyhow!("failed to open SQL store: {}", e))?,
    );
    info!("SQL store at {}", core_config.resolve_sqlite_path().display());

    // ── Modules ──

    let users_module = users::UsersModule::new(Arc::clone(&sql))?;
    info!("Users module initialized");

    let directory: Arc<dyn UserDirectory> = users_module.service().clone();
    let emitter = build_emitter(&server_config.notifications)?;
    let following_module = FollowingModule::with_config(
        sql,
        directory,
        emitter,
        DispatcherConfig {
            poll_interval: server_config.notifications.poll_interval_secs,
            batch_size: server_config.notifications.batch_size,
            max_attempts: server_config.notifications.max_attempts,
        },
    )?;
    info!("Following module initialized");

    let module_routes = vec![
        (users_module.name(), users_module.routes()),
        (following_module.name(), following_module.routes()),
    ];
    let app = routes::build_router(module_routes);

    // Start server.
    let listener = tokio::net::TcpListener::bind(&core_config.listen).await?;
    info!("usergraphd listening on {}", core_config.listen);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    following_module.shutdown().await;
    info!("usergraphd stopped");
    Ok(())
}

fn build_emitter(config: &NotificationsConfig) -> anyhow::Result<Arc<dyn NotificationEmitter>> {
    if config.url.is_empty() {
        warn!("No notification service configured; notifications will only be logged");
        return Ok(Arc::new(LogEmitter));
    }
    let emitter = HttpEmitter::new(&config.url, Duration::from_secs(config.timeout_secs))?;
    info!("Notifications delivered to {}", emitter.url());
    Ok(Arc::new(emitter))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
