//! routeplane-emitter — publishes routing diffs to the router.
//!
//! Fire-and-forget by design: a failed publish is logged and skipped,
//! never queued or retried, because the periodic re-announce converges
//! the router regardless.

use std::sync::Arc;

use tracing::{debug, warn};

use routeplane_bus::{MessageBus, ROUTER_REGISTER, ROUTER_UNREGISTER};
use routeplane_metrics::Counter;
use routeplane_table::{MessagesToEmit, RegistryMessage};

pub struct RouteEmitter {
    bus: Arc<dyn MessageBus>,
}

impl RouteEmitter {
    pub fn new(bus: Arc<dyn MessageBus>) -> Self {
        Self { bus }
    }

    /// Publish a diff, incrementing the counters by the number of
    /// messages actually sent.
    pub async fn emit(
        &self,
        messages: &MessagesToEmit,
        registered: &Counter,
        unregistered: &Counter,
    ) {
        if messages.is_empty() {
            return;
        }

        let sent_registrations = self
            .publish_batch(ROUTER_REGISTER, &messages.registrations)
            .await;
        let sent_unregistrations = self
            .publish_batch(ROUTER_UNREGISTER, &messages.unregistrations)
            .await;

        registered.add(sent_registrations);
        unregistered.add(sent_unregistrations);
        debug!(
            registered = sent_registrations,
            unregistered = sent_unregistrations,
            "emitted router messages"
        );
    }

    async fn publish_batch(&self, subject: &str, batch: &[RegistryMessage]) -> u64 {
        let mut sent = 0;
        for message in batch {
            let payload = match serde_json::to_vec(message) {
                Ok(payload) => payload,
                Err(err) => {
                    warn!(subject, error = %err, "failed to encode registry message");
                    continue;
                }
            };
            match self.bus.publish(subject, payload).await {
                Ok(()) => sent += 1,
                Err(err) => {
                    warn!(subject, error = %err, "failed to publish registry message");
                }
            }
        }
        sent
    }
}
