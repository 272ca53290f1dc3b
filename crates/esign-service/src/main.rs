use clap::{Parser, ValueEnum};
use esign_service::config::StorageBackend;
use esign_service::{build_router, ServiceConfig, ServiceState};
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StorageMode {
    Auto,
    Memory,
    Postgres,
}

impl From<StorageMode> for StorageBackend {
    fn from(mode: StorageMode) -> Self {
        match mode {
            StorageMode::Auto => StorageBackend::Auto,
            StorageMode::Memory => StorageBackend::Memory,
            StorageMode::Postgres => StorageBackend::Postgres,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "esignd", version, about = "Envelope e-signature REST service")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "ESIGN_CONFIG")]
    config: Option<String>,

    /// REST socket address to bind, e.g. 127.0.0.1:8080
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Log level, overridden by RUST_LOG
    #[arg(long)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json: bool,

    /// Envelope persistence backend. `auto` picks postgres when a database url is configured.
    #[arg(long, value_enum)]
    storage: Option<StorageMode>,

    /// PostgreSQL url for envelope persistence.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

fn init_tracing(level: &str, json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("esign_service={level},esign_core={level},{level}").into());

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = ServiceConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    config.logging.json |= cli.json;
    if let Some(mode) = cli.storage {
        config.storage.backend = mode.into();
    }
    if cli.database_url.is_some() {
        config.storage.database_url = cli.database_url;
    }

    init_tracing(&config.logging.level, config.logging.json);

    let state = ServiceState::bootstrap(&config).await?;
    info!(
        storage = state.storage_backend,
        documents = %config.documents.root.display(),
        seal_mode = ?config.engine.seal_mode,
        "esign-service bootstrapped"
    );
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.server.listen).await?;
    info!("esign-service REST listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("esign-service shutting down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => info!("received terminate signal, initiating graceful shutdown"),
    }
}
