use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quarry_core::{
    create_orchestrator, load_config, HttpPageAgent, PageBackends,
    SqliteStateStore, StateStore,
};
use quarry_server::api::create_router;
use quarry_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Quarry v{}", VERSION);

    // Determine config path
    let config_path = std::env::var("QUARRY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load and validate configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);

    // Create SQLite state store
    let store: Arc<dyn StateStore> = Arc::new(
        SqliteStateStore::new(&config.database.path).context("Failed to create state store")?,
    );
    info!("State store initialized");

    // Create page agent client
    let agent = Arc::new(
        HttpPageAgent::new(config.agent.clone(), Arc::clone(&store))
            .context("Failed to create page agent client")?,
    );
    info!(
        "Page agent at {}",
        quarry_core::SanitizedConfig::from(&config).agent.base_url
    );
    let backends = PageBackends::new(agent.clone(), agent.clone(), agent);

    // Create orchestrator from persisted state
    let (orchestrator, orchestrator_loop) =
        create_orchestrator(config.batch.clone(), Arc::clone(&store), backends)
            .context("Failed to restore orchestrator state")?;
    let loop_handle = tokio::spawn(orchestrator_loop.run());
    info!("Batch orchestrator started");

    // Create app state
    let state = Arc::new(AppState::new(config.clone(), orchestrator.clone()));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Persist and stop the orchestrator; running jobs resume on next start
    info!("Server shutting down...");
    if let Err(e) = orchestrator.shutdown().await {
        warn!("Orchestrator shutdown failed: {}", e);
    }
    drop(orchestrator);
    let _ = loop_handle.await;
    info!("Orchestrator stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
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
}
