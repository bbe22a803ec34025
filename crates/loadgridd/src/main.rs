//! loadgridd — the LoadGrid daemon.
//!
//! Single binary that assembles the whole replay stack:
//! - Windowed metric store + statsd sink
//! - Fleet view + dispatch pipeline (one worker per endpoint)
//! - Replay scheduler + completion sink
//! - Autoscaling control loop against the forecaster and fleet dashboard
//! - REST API
//!
//! # Usage
//!
//! ```text
//! loadgridd run --config loadgrid.toml --port 8080
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use loadgrid_api::ApiState;
use loadgrid_autoscale::Scaler;
use loadgrid_core::Endpoint;
use loadgrid_core::config::Config;
use loadgrid_fleet::{FleetEvent, FleetView};
use loadgrid_metrics::{MetricStore, MetricsSink, NoopSink, StatsdSink};
use loadgrid_pipeline::Dispatcher;
use loadgrid_remote::{FleetApi, HttpGenerateBackend};
use loadgrid_replay::ReplayScheduler;

/// Dashboard and forecaster calls are quick control-plane requests, unlike
/// generation calls which use the configured long API timeout.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "loadgridd", about = "LoadGrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon.
    Run {
        /// Configuration file.
        #[arg(long, default_value = "loadgrid.toml")]
        config: PathBuf,

        /// Override the configured API port.
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,loadgridd=debug,loadgrid=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run { config, port } => run(&config, port).await,
    }
}

async fn run(config_path: &std::path::Path, port_override: Option<u16>) -> anyhow::Result<()> {
    info!("LoadGrid daemon starting");

    let config = Config::load(config_path)?;
    let port = port_override.unwrap_or(config.server.port);

    // ── Initialize subsystems ──────────────────────────────────

    let sink: Arc<dyn MetricsSink> = match &config.metrics.statsd_addr {
        Some(addr) => {
            info!(%addr, "statsd sink connected");
            Arc::new(StatsdSink::connect(addr)?)
        }
        None => Arc::new(NoopSink),
    };

    let store = MetricStore::new(config.metrics_window());
    let fleet = FleetView::new();
    info!(
        window_secs = config.scaler.metrics_window_secs,
        "metric store initialized"
    );

    let backend = Arc::new(HttpGenerateBackend::new(config.api_timeout()));
    let (dispatcher, done_rx) = Dispatcher::new(
        backend,
        fleet.clone(),
        store.clone(),
        sink.clone(),
        &config.pipeline,
    );
    info!(
        max_queue = config.pipeline.max_queue,
        max_retry = config.pipeline.max_retry,
        "dispatch pipeline initialized"
    );

    let remote = Arc::new(FleetApi::new(
        config.remote.fleet_endpoint.clone(),
        config.remote.forecast_endpoint.clone(),
        CONTROL_TIMEOUT,
    ));
    let scaler = Scaler::new(
        config.scaler.clone(),
        config.replay.output_dir.clone(),
        store.clone(),
        sink,
        remote,
        fleet.clone(),
    );
    info!(
        autoscaling = config.scaler.enable_autoscaling,
        "autoscaler initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Fleet discovery ────────────────────────────────────────

    // Events come from an external discovery collaborator; the configured
    // generation endpoint seeds the fleet so replays work without one.
    let (event_tx, event_rx) = mpsc::channel::<FleetEvent>(64);
    match config.remote.generate_endpoint.parse::<Endpoint>() {
        Ok(endpoint) => {
            let hostname = endpoint.host.clone();
            let _ = event_tx.send(FleetEvent::Added { endpoint, hostname }).await;
        }
        Err(e) => warn!(
            endpoint = %config.remote.generate_endpoint,
            error = %e,
            "generation endpoint not parseable, fleet starts empty"
        ),
    }
    let discovery_dispatcher = dispatcher.clone();
    let discovery_shutdown = shutdown_rx.clone();
    let discovery_handle = tokio::spawn(async move {
        discovery_dispatcher
            .run_discovery(event_rx, discovery_shutdown)
            .await;
    });

    // ── Replay scheduler + completion sink ─────────────────────

    let scheduler = ReplayScheduler::new(
        dispatcher.clone(),
        scaler.clone(),
        config.replay.output_dir.clone(),
        shutdown_rx,
    );
    let sink_scheduler = scheduler.clone();
    let completions_handle = tokio::spawn(async move {
        sink_scheduler.run_completions(done_rx).await;
    });
    info!(output_dir = %config.replay.output_dir, "replay scheduler initialized");

    // ── Start API server ───────────────────────────────────────

    let router = loadgrid_api::build_router(ApiState {
        scheduler,
        scaler: scaler.clone(),
        store,
        fleet,
    });
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C handler");
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // The shutdown watch has already stopped the replay timer; drain the
    // workers through the grace period, then stop the control loop.
    dispatcher.shutdown(config.shutdown_grace()).await;
    scaler.stop();
    drop(event_tx);
    let _ = discovery_handle.await;
    // The completion channel stays open as long as any pipeline handle
    // lives; with the workers gone nothing more can arrive on it.
    completions_handle.abort();

    info!("LoadGrid daemon stopped");
    Ok(())
}
