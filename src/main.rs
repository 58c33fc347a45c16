// ------------------------------------------------------------
// Module declarations
// ------------------------------------------------------------
//
// Each module represents a well-defined responsibility:
//
// - config:      YAML file + environment configuration
// - schema:      Typed OvenMediaEngine payload definitions
// - util:        Shared helpers (timestamps, URL building)
// - api:         Upstream API trait and reqwest client
// - metrics:     Prometheus registry of per-stream series
// - collector:   Collection cycle, reconciliation, scheduler
// - exposition:  `/metrics` HTTP endpoint
//
mod api;
mod collector;
mod config;
mod exposition;
mod metrics;
mod schema;
mod util;

// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use clap::Parser;
use log::{error, info, warn};
use rustls::crypto::{CryptoProvider, ring};

use api::OvenMediaClient;
use collector::{Collector, probe::probe, runner::run_scheduler};
use config::Config;
use metrics::StreamMetrics;

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};
use tokio::sync::watch;

#[derive(Parser)]
#[command(name = "ovenmedia-exporter")]
#[command(about = "Prometheus exporter for OvenMediaEngine stream statistics")]
#[command(version)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "config/config.yaml")]
    config: PathBuf,

    /// Override the metrics listen address (e.g. 0.0.0.0:8000)
    #[arg(long)]
    listen: Option<SocketAddr>,

    /// Override the collection interval in seconds
    #[arg(long)]
    interval: Option<u64>,

    /// Print one raw snapshot of the upstream API and exit
    #[arg(long)]
    probe: bool,
}

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Initialize cryptography backend (rustls) for HTTPS upstreams
// - Load configuration and set up logging
// - Start the `/metrics` server and the collection scheduler
// - Stop both in order on SIGINT / SIGTERM
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --------------------------------------------------------
    // rustls >= 0.23 requires an explicit CryptoProvider.
    // Must run exactly once, before any client is built.
    // --------------------------------------------------------
    CryptoProvider::install_default(ring::default_provider())
        .expect("failed to install rustls CryptoProvider");

    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.exporter.listen = listen;
    }
    if let Some(secs) = cli.interval {
        config.exporter.interval = Duration::from_secs(secs.max(1));
    }

    init_logging(config.debug);
    for message in &config.warnings {
        warn!("{message}");
    }
    info!(
        "Using OvenMediaEngine API at {} (app={}, auth={})",
        config.api.base_url,
        config.api.app,
        if config.api.token.is_some() { "token" } else { "none" },
    );

    let client = Arc::new(OvenMediaClient::new(&config.api, config.debug)?);

    if cli.probe {
        let mut stdout = std::io::stdout().lock();
        probe(client.as_ref(), &config.default_vhost, &mut stdout).await?;
        return Ok(());
    }

    let metrics = Arc::new(StreamMetrics::new()?);
    let collector = Arc::new(Collector::new(
        client,
        metrics.clone(),
        config.exporter.concurrency,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = tokio::spawn(exposition::serve(
        config.exporter.listen,
        metrics,
        shutdown_rx.clone(),
    ));
    let scheduler = tokio::spawn(run_scheduler(
        collector,
        config.exporter.interval,
        shutdown_rx,
    ));

    info!(
        "OvenMediaEngine exporter started, collecting every {:?}",
        config.exporter.interval
    );

    shutdown_signal().await;
    info!("Shutdown signal received, stopping exporter...");
    let _ = shutdown_tx.send(true);

    if let Err(e) = scheduler.await {
        error!("Collection scheduler task failed: {e}");
    }
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("Metrics server failed: {e:#}"),
        Err(e) => error!("Metrics server task failed: {e}"),
    }

    info!("Exporter stopped");
    Ok(())
}

// ------------------------------------------------------------
// Logging
// ------------------------------------------------------------
//
// RUST_LOG wins when set. Otherwise `info`, or `debug` for this
// crate when the config debug flag is on.
//
fn init_logging(debug: bool) {
    let default = if debug {
        "info,ovenmedia_exporter=debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default)).init();
}

// ------------------------------------------------------------
// Process signals
// ------------------------------------------------------------
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
