use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use recurd_core::config::RecurdConfig;
use recurd_scheduler::{JobStore, SchedulerEngine};
use tracing::{info, warn};

mod app;
mod functions;
mod http;

/// Recurring job scheduler with an HTTP admin API.
#[derive(Debug, Parser)]
#[command(name = "recurd-gateway", version)]
struct Cli {
    /// Path to recurd.toml (falls back to RECURD_CONFIG, then ~/.recurd/recurd.toml).
    #[arg(long)]
    config: Option<String>,

    /// Override gateway.bind.
    #[arg(long)]
    bind: Option<String>,

    /// Override gateway.port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "recurd_gateway=info,recurd_scheduler=info,tower_http=debug".into()
            }),
        )
        .init();

    let cli = Cli::parse();

    let mut config = RecurdConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        RecurdConfig::default()
    });
    if let Some(bind) = cli.bind {
        config.gateway.bind = bind;
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    let db_path = Path::new(&config.database.path);
    ensure_parent_dir(db_path);
    info!(path = %db_path.display(), "opening SQLite database");
    let store = JobStore::open(db_path)?;

    let engine = SchedulerEngine::new(store, &config.scheduler);
    if config.scheduler.sample_functions {
        functions::register_builtin(&engine);
    }
    engine.start().await?;

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, engine.clone()));
    let router = app::build_router(state);

    info!("recurd gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    engine.stop().await;
    info!("recurd gateway stopped");
    Ok(())
}

fn ensure_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(dir = %parent.display(), error = %e, "could not create database directory");
        }
    }
}

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
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
    info!("shutdown signal received");
}
