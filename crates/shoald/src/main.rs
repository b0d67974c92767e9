//! shoald — autoscaling request router for container workers.
//!
//! # Usage
//!
//! ```text
//! shoald --port 8080 --data-dir /var/lib/shoal \
//!        --runtime-url http://127.0.0.1:7070 --config shoal.toml
//! ```
//!
//! The daemon routes every inbound request to the least-loaded healthy
//! container, collects per-instance telemetry on a heartbeat, and scales
//! the fleet within configured bounds. Fleet state lives in
//! `<data-dir>/shoal.redb` and survives restarts.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use shoal_runtime::RemoteRuntime;
use shoal_state::Registry;
use shoald::{config::ShoaldConfig, controller::Controller, server};

#[derive(Parser)]
#[command(name = "shoald", about = "Autoscaling request router for container workers")]
struct Cli {
    /// Port for the entry surface.
    #[arg(long, default_value = "8080")]
    port: u16,

    /// Data directory for persistent fleet state.
    #[arg(long, default_value = "/var/lib/shoal")]
    data_dir: PathBuf,

    /// Base URL of the container runtime daemon.
    #[arg(long, default_value = "http://127.0.0.1:7070")]
    runtime_url: String,

    /// Optional shoal.toml config file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ShoaldConfig::from_file(path)?,
        None => ShoaldConfig::default(),
    };

    std::fs::create_dir_all(&cli.data_dir)?;
    let registry = Registry::open(&cli.data_dir.join("shoal.redb"))?;
    let runtime = Arc::new(RemoteRuntime::new(&cli.runtime_url)?);

    let controller = Controller::new(registry, runtime, config.manager(), config.controller());
    controller.init().await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let heartbeat = tokio::spawn(server::run_heartbeat(controller.clone(), shutdown_rx));

    let app = server::build_router(controller);
    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, runtime = %cli.runtime_url, "shoald serving");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install CTRL+C handler");
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    let _ = heartbeat.await;
    info!("shoald stopped");
    Ok(())
}
