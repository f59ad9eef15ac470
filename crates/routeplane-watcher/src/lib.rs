//! routeplane-watcher — the event-driven reconciler.
//!
//! Consumes the orchestrator's change stream and translates each event
//! into routing-table mutations, publishing the resulting diff as it
//! goes. Events are applied strictly in delivery order; coalescing is
//! left to the table's idempotence and the periodic full sync.
//!
//! On a stream read error the watcher reopens the subscription once;
//! if the reopen fails it surfaces the error so the supervisor can
//! restart or step down the process.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use routeplane_core::{routes_from_info, ActualRecord, ChangeEvent, DesiredRecord, InstanceState};
use routeplane_emitter::RouteEmitter;
use routeplane_metrics::EmitterMetrics;
use routeplane_orchestrator::{OrchestratorClient, OrchestratorError};
use routeplane_table::{endpoints_from_actual, routing_keys_from_desired, Routes, RoutingKey, RoutingTable};

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("event subscription failed: {0}")]
    Subscribe(#[source] OrchestratorError),
}

pub struct Watcher {
    orchestrator: Arc<dyn OrchestratorClient>,
    table: Arc<RoutingTable>,
    emitter: Arc<RouteEmitter>,
    metrics: EmitterMetrics,
}

impl Watcher {
    pub fn new(
        orchestrator: Arc<dyn OrchestratorClient>,
        table: Arc<RoutingTable>,
        emitter: Arc<RouteEmitter>,
        metrics: EmitterMetrics,
    ) -> Self {
        Self {
            orchestrator,
            table,
            emitter,
            metrics,
        }
    }

    /// Run until shutdown or an unrecoverable subscription failure.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), WatcherError> {
        let mut source = self
            .orchestrator
            .subscribe_events()
            .await
            .map_err(WatcherError::Subscribe)?;
        info!("watcher started");

        loop {
            tokio::select! {
                event = source.next_event() => match event {
                    Ok(event) => {
                        debug!(kind = event.kind(), "handling event");
                        self.handle_event(event).await;
                    }
                    Err(err) => {
                        warn!(error = %err, "event stream failed, resubscribing");
                        source = self
                            .orchestrator
                            .subscribe_events()
                            .await
                            .map_err(WatcherError::Subscribe)?;
                    }
                },
                _ = shutdown.changed() => {
                    info!("watcher stopping");
                    return Ok(());
                }
            }
        }
    }

    pub async fn handle_event(&self, event: ChangeEvent) {
        match event {
            ChangeEvent::DesiredCreated { record } => self.handle_desired_update(&record).await,
            ChangeEvent::DesiredChanged { after, .. } => self.handle_desired_update(&after).await,
            ChangeEvent::DesiredRemoved { record } => self.handle_desired_removed(&record).await,
            ChangeEvent::ActualCreated { record } => {
                if record.state == InstanceState::Running {
                    self.add_endpoints_and_emit(&record).await;
                }
            }
            ChangeEvent::ActualChanged { before, after } => {
                if after.state == InstanceState::Running {
                    self.add_endpoints_and_emit(&after).await;
                } else if before.state == InstanceState::Running {
                    self.remove_endpoints_and_emit(&before).await;
                }
            }
            ChangeEvent::ActualRemoved { record } => {
                if record.state == InstanceState::Running {
                    self.remove_endpoints_and_emit(&record).await;
                }
            }
        }
    }

    async fn handle_desired_update(&self, record: &DesiredRecord) {
        let rules = match routes_from_info(&record.routing_info) {
            Ok(rules) => rules,
            Err(err) => {
                warn!(process_id = %record.process_id, error = %err, "skipping desired record with malformed routing info");
                return;
            }
        };

        // Routes are keyed only on ports present both in the declared
        // port list and in the routing blob.
        for key in routing_keys_from_desired(record) {
            for rule in rules.iter().filter(|rule| rule.port == key.container_port) {
                let messages = self.table.set_routes(
                    &key,
                    Routes {
                        hostnames: rule.hostnames.clone(),
                        log_id: record.log_id.clone(),
                        route_service_url: rule.route_service_url.clone(),
                        modification_tag: record.modification_tag.clone(),
                    },
                );
                self.emit(messages).await;
            }
        }
    }

    async fn handle_desired_removed(&self, record: &DesiredRecord) {
        for key in routing_keys_from_desired(record) {
            let messages = self
                .table
                .remove_routes(&key, record.modification_tag.as_ref());
            self.emit(messages).await;
        }
    }

    async fn add_endpoints_and_emit(&self, record: &ActualRecord) {
        for (container_port, endpoint) in endpoints_from_actual(record) {
            let key = RoutingKey::new(record.process_id.clone(), container_port);
            let messages = self.table.add_or_update_endpoint(&key, endpoint);
            self.emit(messages).await;
        }
    }

    async fn remove_endpoints_and_emit(&self, record: &ActualRecord) {
        for (container_port, endpoint) in endpoints_from_actual(record) {
            let key = RoutingKey::new(record.process_id.clone(), container_port);
            let messages = self.table.remove_endpoint(&key, &endpoint);
            self.emit(messages).await;
        }
    }

    async fn emit(&self, messages: routeplane_table::MessagesToEmit) {
        self.emitter
            .emit(
                &messages,
                &self.metrics.routes_registered,
                &self.metrics.routes_unregistered,
            )
            .await;
    }
}
