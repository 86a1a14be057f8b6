//! ferrylog -- log-segment ingestion node.
//!
//! Serves the lease protocol over HTTP and participates in the gossip
//! cluster. Shutdown is deliberate about leases: SIGTERM/SIGINT stops
//! the listener, then every pending lease is force-failed back into
//! the segment log before the node leaves the cluster, so nothing a
//! consumer reserved is ever stranded.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use ferrylog::cluster::peer::{JoinOptions, Peer};
use ferrylog::cluster::transport::{Gossip, Hub};
use ferrylog::ingest::coordinator::Coordinator;
use ferrylog::ingest::memory::MemorySegmentLog;

/// Command-line arguments for the ferrylog server.
#[derive(Parser, Debug)]
#[command(name = "ferrylog", version, about = "Log-segment ingestion node")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(short, long, default_value = "ferrylog.example.yaml")]
    config: String,

    /// Override the API bind address (host:port).
    #[arg(short, long)]
    bind: Option<String>,

    /// Additional cluster seed endpoints (host:port). Repeatable.
    #[arg(long)]
    seed: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing / logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    info!("Loading configuration from {}", cli.config);
    let config = ferrylog::config::load_config(&cli.config)?;

    let bind_addr = cli
        .bind
        .unwrap_or_else(|| format!("{}:{}", config.server.host, config.server.port));

    if config.observability.metrics {
        ferrylog::metrics::init_metrics();
        ferrylog::metrics::describe_metrics();
        info!("Prometheus metrics initialized");
    }

    // The durable segment log is its own concern; this node runs over
    // the in-memory pool.
    let log = Arc::new(MemorySegmentLog::new());

    // Join the cluster.
    let mut seeds = config.cluster.seeds.clone();
    seeds.extend(cli.seed);
    let hub = Hub::new();
    let peer = Peer::join(
        JoinOptions {
            bind_addr: config.cluster.bind_addr.clone(),
            bind_port: config.cluster.bind_port,
            seeds,
            role: config.cluster.role,
            api_port: config.server.port,
        },
        |gossip_config, directory| {
            Ok(Box::new(hub.register(gossip_config, directory)?) as Box<dyn Gossip>)
        },
    )
    .await?;
    info!(name = %peer.name(), members = peer.size(), role = %config.cluster.role, "joined cluster");

    let coordinator = Coordinator::start(log, config.ingest.pending_timeout());

    let state = Arc::new(ferrylog::AppState {
        config: config.clone(),
        coordinator: coordinator.clone(),
        peer,
    });

    let app = ferrylog::server::app(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("ferrylog listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Fail every pending lease back into the log, then say goodbye.
    coordinator.stop().await;
    state.peer.leave(config.cluster.leave_timeout()).await?;
    info!("ferrylog shut down");

    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C), then return to trigger graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
