//! routeplaned — the route emitter daemon.
//!
//! Bridges the orchestrator's desired/actual state to the HTTP
//! router's forwarding table: elects a single active instance via the
//! coordination service, keeps the in-memory routing table in sync
//! through live events and periodic full reconciliation, and
//! re-announces all routes on the router's heartbeat cadence.
//!
//! # Usage
//!
//! ```text
//! routeplaned run --config /etc/routeplane/config.toml
//! routeplaned run --orchestrator-url http://10.0.0.5:8889 --bus-address 10.0.0.9:4222
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};

use routeplane_bus::{MessageBus, NatsBus};
use routeplane_core::Config;
use routeplane_emitter::RouteEmitter;
use routeplane_lock::{wait_lost, ConsulCoordination, CoordinationClient, LeaderLock};
use routeplane_metrics::EmitterMetrics;
use routeplane_orchestrator::{HttpOrchestratorClient, OrchestratorClient};
use routeplane_syncer::{Syncer, SyncerConfig};
use routeplane_table::RoutingTable;
use routeplane_watcher::Watcher;

#[derive(Parser)]
#[command(name = "routeplaned", about = "Route emitter daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the route emitter.
    Run {
        /// Path to a TOML config file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Session name announced on the bus.
        #[arg(long)]
        session_name: Option<String>,

        /// Bus server address (repeatable).
        #[arg(long = "bus-address")]
        bus_addresses: Vec<String>,

        /// Orchestrator API base URL.
        #[arg(long)]
        orchestrator_url: Option<String>,

        /// Coordination service base URL.
        #[arg(long)]
        coordination_url: Option<String>,

        /// Full reconciliation interval in seconds.
        #[arg(long)]
        sync_interval_secs: Option<u64>,

        /// Leader-lock retry interval in seconds.
        #[arg(long)]
        lock_retry_interval_secs: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,routeplane=debug".parse().expect("default filter")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            config,
            session_name,
            bus_addresses,
            orchestrator_url,
            coordination_url,
            sync_interval_secs,
            lock_retry_interval_secs,
        } => {
            let mut config = match config {
                Some(path) => Config::from_file(&path)
                    .with_context(|| format!("loading config from {}", path.display()))?,
                None => Config::default(),
            };
            if let Some(session_name) = session_name {
                config.session_name = session_name;
            }
            if !bus_addresses.is_empty() {
                config.bus_addresses = bus_addresses;
            }
            if let Some(orchestrator_url) = orchestrator_url {
                config.orchestrator_url = orchestrator_url;
            }
            if let Some(coordination_url) = coordination_url {
                config.coordination_url = coordination_url;
            }
            if let Some(secs) = sync_interval_secs {
                config.sync_interval_secs = secs;
            }
            if let Some(secs) = lock_retry_interval_secs {
                config.lock_retry_interval_secs = secs;
            }

            run(config).await
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    info!(session = %config.session_name, "route emitter starting");

    let bus: Arc<dyn MessageBus> = Arc::new(
        NatsBus::connect(&config.bus_addresses, &config.session_name)
            .await
            .context("connecting to the bus")?,
    );
    let orchestrator: Arc<dyn OrchestratorClient> = Arc::new(
        HttpOrchestratorClient::new(&config.orchestrator_url, config.communication_timeout())
            .context("building the orchestrator client")?,
    );
    let coordination: Arc<dyn CoordinationClient> = Arc::new(
        ConsulCoordination::new(&config.coordination_url)
            .context("building the coordination client")?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = signal_tx.send(true);
        }
    });

    // Stay passive until the cluster-wide lock is held.
    let owner = format!("{}-{}", config.session_name, std::process::id());
    let leader = LeaderLock::new(
        coordination,
        format!("{}/leader", config.session_name),
        owner,
        config.lock_ttl(),
        config.lock_retry_interval(),
        config.lock_max_attempts,
    );
    let Some(lease) = leader.acquire(shutdown_rx.clone()).await? else {
        info!("shutdown before leadership, exiting");
        return Ok(());
    };

    let table = Arc::new(RoutingTable::new());
    let metrics = EmitterMetrics::new();
    let emitter = Arc::new(RouteEmitter::new(bus.clone()));

    let watcher = Watcher::new(
        orchestrator.clone(),
        table.clone(),
        emitter.clone(),
        metrics.clone(),
    );
    let syncer = Syncer::new(
        bus,
        orchestrator,
        table,
        emitter,
        metrics,
        SyncerConfig {
            session_name: config.session_name.clone(),
            sync_interval: config.sync_interval(),
            greet_retry_interval: config.greet_retry_interval(),
        },
    );

    // Component exits are fatal unless shutdown asked for them.
    let (fatal_tx, mut fatal_rx) = tokio::sync::mpsc::channel::<anyhow::Error>(2);

    let watcher_shutdown = shutdown_rx.clone();
    let watcher_fatal = fatal_tx.clone();
    let mut watcher_handle = tokio::spawn(async move {
        if let Err(err) = watcher.run(watcher_shutdown).await {
            let _ = watcher_fatal.send(err.into()).await;
        }
    });

    let syncer_shutdown = shutdown_rx.clone();
    let syncer_fatal = fatal_tx;
    let mut syncer_handle = tokio::spawn(async move {
        if let Err(err) = syncer.run(syncer_shutdown).await {
            let _ = syncer_fatal.send(err.into()).await;
        }
    });

    let outcome: anyhow::Result<()> = tokio::select! {
        Some(err) = fatal_rx.recv() => Err(err),
        _ = wait_lost(lease.lost()) => Err(anyhow::anyhow!("leader lock lost")),
        _ = wait_shutdown(shutdown_rx) => Ok(()),
    };

    // Orderly stop: signal everyone, give them the grace period, then
    // cut whatever is left. No emission happens after this point.
    let _ = shutdown_tx.send(true);
    let drain = async {
        let _ = (&mut watcher_handle).await;
        let _ = (&mut syncer_handle).await;
    };
    if tokio::time::timeout(config.shutdown_grace(), drain)
        .await
        .is_err()
    {
        warn!("components did not stop within the grace period, aborting them");
        watcher_handle.abort();
        syncer_handle.abort();
    }
    drop(lease);

    match &outcome {
        Ok(()) => info!("route emitter stopped"),
        Err(err) => warn!(error = %err, "route emitter exiting"),
    }
    outcome
}

async fn wait_shutdown(mut shutdown: watch::Receiver<bool>) {
    if *shutdown.borrow() {
        return;
    }
    let _ = shutdown.changed().await;
}
