// ABOUTME: Main entry point for the repl-box session service

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use repl_box::api::{self, AppState};
use repl_box::config::AppConfig;
use repl_box::docker::DockerRuntime;
use repl_box::session::{SessionLifecycleManager, SessionRegistry};

#[derive(Debug, Parser)]
#[command(author, version, about = "REPL session service for containerized coding exercises")]
struct Cli {
    /// Host on which to serve HTTP
    #[arg(long)]
    host: Option<String>,

    /// Port on which to serve HTTP
    #[arg(short = 'p', long)]
    port: Option<u16>,

    /// Port on which REPL containers serve HTTP
    #[arg(long)]
    repl_port: Option<u16>,

    /// Docker network shared with REPL containers
    #[arg(long)]
    network: Option<String>,

    /// Image from which REPL containers are started
    #[arg(long)]
    repl_image: Option<String>,

    /// Path to a TOML config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => AppConfig::load().context("loading config")?,
    };
    apply_cli_overrides(&mut config, &cli);

    let runtime = Arc::new(
        DockerRuntime::new()
            .await
            .context("connecting to the Docker daemon")?,
    );
    let registry = Arc::new(SessionRegistry::new());
    let sessions = Arc::new(SessionLifecycleManager::new(runtime, config.repl.clone()));

    let state = AppState::new(Arc::clone(&registry), Arc::clone(&sessions));
    let app = api::create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid listen address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!("listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;

    // Drain the registry so no REPL container outlives the service.
    info!("shutting down, cleaning up sessions");
    sessions.shutdown_all(&registry).await;

    Ok(())
}

fn apply_cli_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(repl_port) = cli.repl_port {
        config.repl.port = repl_port;
    }
    if let Some(network) = &cli.network {
        config.repl.network = network.clone();
    }
    if let Some(image) = &cli.repl_image {
        config.repl.image = image.clone();
    }
}

fn init_tracing(verbosity: u8) {
    let fallback = match verbosity {
        0 => "warn",
        1 => "repl_box=info,warn",
        _ => "repl_box=debug,info",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
