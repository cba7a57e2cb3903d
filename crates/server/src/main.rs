use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use brandlens_core::{
    load_config, validate_config, BrandCatalog, Config, CredentialSource, GatewayRegistry,
    LogFormat, MentionRepository, SqliteMentionRepository,
};
use brandlens_server::{api::create_router, state::AppState};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        eprintln!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},tower_http=debug", config.logging.level)));

    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }
}

async fn run() -> Result<()> {
    // Determine config path
    let config_path = std::env::var("BRANDLENS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration before logging so the format can come from it
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    init_tracing(&config);
    info!(version = VERSION, "Starting brandlens");
    info!("Loaded configuration from {:?}", config_path);

    validate_config(&config).context("Configuration validation failed")?;

    let config_bytes = std::fs::read(&config_path)
        .with_context(|| format!("Failed to read config from {:?}", config_path))?;
    let config_hash = format!("{:x}", Sha256::digest(&config_bytes));
    info!(config_hash = &config_hash[..16], "Configuration validated");
    info!("Database path: {:?}", config.database.path);

    let repository: Arc<dyn MentionRepository> = Arc::new(
        SqliteMentionRepository::new(&config.database.path)
            .context("Failed to open mention repository")?,
    );
    info!("Mention repository initialized");

    let catalog = match &config.catalog.path {
        Some(path) => BrandCatalog::load(path)
            .with_context(|| format!("Failed to load brand catalog from {:?}", path))?,
        None => BrandCatalog::builtin().context("Failed to load builtin brand catalog")?,
    };
    info!(brands = catalog.len(), "Brand catalog loaded");

    let registry = Arc::new(GatewayRegistry::with_builtin_backends());
    let configured = config.configured_backends();
    if configured.is_empty() {
        warn!("No gateway credentials configured; detection checks will fail");
    } else {
        info!(backends = ?configured, "Gateway credentials configured");
    }

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let state = Arc::new(AppState::new(
        config,
        registry,
        repository,
        Arc::new(catalog),
    ));

    let app = create_router(state);

    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down");
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
            Ok(mut sig) => {
                sig.recv().await;
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
