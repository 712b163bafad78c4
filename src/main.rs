//! Xenstats Exporter - XenAPI metrics for Prometheus
//!
//! Exposes memory, CPU, storage and pool configuration of a XenServer pool
//! as Prometheus gauges.

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use xenstats_exporter::{app::App, cli::Cli, config::Config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration by layering sources: defaults, file, environment, and CLI args.
    let config = match Config::load(&cli) {
        Ok(config) => config,
        Err(err) => {
            tracing_subscriber::fmt().init();
            error!("Failed to load configuration: {:#}", err);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Xenstats exporter starting up...");
    info!("-------------------- Configuration --------------------");
    info!("Xen Host: {}", config.xenhost);
    info!("Username: {}", config.credentials.username);
    info!("Namespace: {}", config.namespace);
    info!("Log Level: {}", config.log_level);
    info!("Call Timeout: {}ms", config.xenapi.call_timeout_ms);
    info!("Accept Invalid Certs: {}", config.xenapi.accept_invalid_certs);
    info!("Listen Address: {}", config.server.listen_address);
    info!("Metrics Path: {}", config.server.metrics_path);
    info!("Internal Metrics: {}", config.server.internal_metrics);
    info!("-------------------------------------------------------");

    if config.xenhost.is_empty() {
        warn!("No xenhost configured; every scrape will report a session failure.");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received. Shutting down gracefully...");
        shutdown_tx.send(true).ok();
    });

    let app = App::builder(config).build(shutdown_rx).await?;
    app.run().await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
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
                error!("Failed to listen for SIGTERM: {}", e);
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
