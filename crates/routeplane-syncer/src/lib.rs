//! routeplane-syncer — heartbeat handshake and periodic reconciliation.
//!
//! Owns the router handshake and both timers:
//!
//! - **Handshake**: greet the router with a reply subject on a retry
//!   cadence until a `router.start` arrives (on the reply inbox or the
//!   broadcast subject); adopt its minimum register interval as the
//!   re-announce cadence. Later `router.start` messages update the
//!   cadence live.
//! - **Heartbeat**: on each cadence tick, re-announce the full
//!   register set so the router's TTL never prunes live routes.
//! - **Full sync**: on its own interval, fetch desired and actual
//!   state in parallel, fold them into a fresh table, swap it in and
//!   publish the diff. Either fetch failing aborts that sync; the next
//!   tick retries. Ticks never overlap a sync in flight.
//!
//! Completion of each sync and each heartbeat emit is signalled on
//! broadcast channels for tests and coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use routeplane_bus::{BusError, MessageBus, RouterStart, ROUTER_GREET, ROUTER_START};
use routeplane_emitter::RouteEmitter;
use routeplane_metrics::EmitterMetrics;
use routeplane_orchestrator::OrchestratorClient;
use routeplane_table::RoutingTable;

static REPLY_SEQUENCE: AtomicU64 = AtomicU64::new(0);

const EVENT_BUFFER: usize = 16;

#[derive(Debug, Error)]
pub enum SyncerError {
    #[error("bus subscription failed: {0}")]
    Bus(#[from] BusError),

    #[error("bus subscription closed")]
    BusClosed,
}

#[derive(Debug, Clone)]
pub struct SyncerConfig {
    pub session_name: String,
    pub sync_interval: Duration,
    pub greet_retry_interval: Duration,
}

pub struct Syncer {
    bus: Arc<dyn MessageBus>,
    orchestrator: Arc<dyn OrchestratorClient>,
    table: Arc<RoutingTable>,
    emitter: Arc<RouteEmitter>,
    metrics: EmitterMetrics,
    config: SyncerConfig,
    sync_tx: broadcast::Sender<()>,
    emit_tx: broadcast::Sender<()>,
}

impl Syncer {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        orchestrator: Arc<dyn OrchestratorClient>,
        table: Arc<RoutingTable>,
        emitter: Arc<RouteEmitter>,
        metrics: EmitterMetrics,
        config: SyncerConfig,
    ) -> Self {
        let (sync_tx, _) = broadcast::channel(EVENT_BUFFER);
        let (emit_tx, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            bus,
            orchestrator,
            table,
            emitter,
            metrics,
            config,
            sync_tx,
            emit_tx,
        }
    }

    /// Signalled after every completed full sync.
    pub fn sync_completed(&self) -> broadcast::Receiver<()> {
        self.sync_tx.subscribe()
    }

    /// Signalled after every heartbeat re-announce.
    pub fn emit_completed(&self) -> broadcast::Receiver<()> {
        self.emit_tx.subscribe()
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), SyncerError> {
        let reply_subject = format!(
            "{}.greet-reply.{}.{}",
            self.config.session_name,
            std::process::id(),
            REPLY_SEQUENCE.fetch_add(1, Ordering::Relaxed),
        );
        let mut start_sub = self.bus.subscribe(ROUTER_START).await?;
        let mut reply_sub = self.bus.subscribe(&reply_subject).await?;
        info!("syncer started");

        // The table is rebuilt from scratch on startup so a fresh
        // leader converges before any event arrives.
        self.sync_once().await;

        let mut sync_ticks = interval_at(
            Instant::now() + self.config.sync_interval,
            self.config.sync_interval,
        );
        sync_ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // First tick fires immediately: the startup greet.
        let mut greet_ticks = interval(self.config.greet_retry_interval);
        greet_ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut heartbeat: Option<Duration> = None;
        let mut next_emit: Option<Instant> = None;

        loop {
            let emit_deadline = next_emit.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                _ = shutdown.changed() => {
                    info!("syncer stopping");
                    return Ok(());
                }
                message = start_sub.next() => {
                    let Some(message) = message else { return Err(SyncerError::BusClosed) };
                    self.handle_router_start(&message.payload, &mut heartbeat, &mut next_emit);
                }
                message = reply_sub.next() => {
                    let Some(message) = message else { return Err(SyncerError::BusClosed) };
                    self.handle_router_start(&message.payload, &mut heartbeat, &mut next_emit);
                }
                _ = greet_ticks.tick(), if heartbeat.is_none() => {
                    self.greet(&reply_subject).await;
                }
                _ = sync_ticks.tick() => {
                    self.sync_once().await;
                }
                _ = sleep_until(emit_deadline), if next_emit.is_some() => {
                    self.emit_all().await;
                    next_emit = heartbeat.map(|interval| Instant::now() + interval);
                }
            }
        }
    }

    /// Adopt a router-announced cadence and re-announce immediately.
    fn handle_router_start(
        &self,
        payload: &[u8],
        heartbeat: &mut Option<Duration>,
        next_emit: &mut Option<Instant>,
    ) {
        let start: RouterStart = match serde_json::from_slice(payload) {
            Ok(start) => start,
            Err(err) => {
                warn!(error = %err, "ignoring malformed router.start");
                return;
            }
        };

        let interval = Duration::from_secs(start.minimum_register_interval_in_seconds.max(1));
        info!(
            interval_secs = interval.as_secs(),
            prune_threshold_secs = start.prune_threshold_in_seconds,
            "router heartbeat interval received"
        );
        *heartbeat = Some(interval);
        *next_emit = Some(Instant::now());
    }

    async fn greet(&self, reply_subject: &str) {
        debug!(reply = reply_subject, "greeting router");
        if let Err(err) = self
            .bus
            .publish_with_reply(ROUTER_GREET, reply_subject, b"{}".to_vec())
            .await
        {
            warn!(error = %err, "failed to greet router");
        }
    }

    /// One full reconciliation pass. Both fetches must succeed before
    /// the table is touched.
    async fn sync_once(&self) {
        let started = Instant::now();
        let (desired, actual) = tokio::join!(
            self.orchestrator.list_desired(),
            self.orchestrator.list_actual(),
        );

        let (desired, actual) = match (desired, actual) {
            (Ok(desired), Ok(actual)) => (desired, actual),
            (desired, actual) => {
                if let Err(err) = &desired {
                    warn!(error = %err, "desired fetch failed, aborting sync");
                }
                if let Err(err) = &actual {
                    warn!(error = %err, "actual fetch failed, aborting sync");
                }
                self.metrics.sync_failures.increment();
                return;
            }
        };

        let target = RoutingTable::from_records(&desired, &actual);
        let messages = self.table.swap(target);
        self.emitter
            .emit(
                &messages,
                &self.metrics.routes_synced,
                &self.metrics.routes_unregistered,
            )
            .await;

        let route_count = self.table.route_count();
        self.metrics.routes_total.set(route_count as u64);
        self.metrics
            .sync_duration_ms
            .set(started.elapsed().as_millis() as u64);

        debug!(
            desired = desired.len(),
            actual = actual.len(),
            routes = route_count,
            registrations = messages.registrations.len(),
            unregistrations = messages.unregistrations.len(),
            "full sync complete"
        );
        let _ = self.sync_tx.send(());
    }

    /// Heartbeat re-announce of the entire register set.
    async fn emit_all(&self) {
        let messages = self.table.messages_to_emit();
        self.emitter
            .emit(
                &messages,
                &self.metrics.routes_synced,
                &self.metrics.routes_unregistered,
            )
            .await;
        self.metrics.routes_total.set(self.table.route_count() as u64);
        let _ = self.emit_tx.send(());
    }
}
