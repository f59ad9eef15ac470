//! routeplane-metrics — counters and gauges for the route emitter.
//!
//! Lock-free atomics shared by value; the whole set clones cheaply so
//! every component can hold its own handle. Rendered in Prometheus
//! text exposition format for scraping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic counter.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn increment(&self) {
        self.add(1);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Last-write-wins gauge.
#[derive(Debug, Clone, Default)]
pub struct Gauge(Arc<AtomicU64>);

impl Gauge {
    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// The emitter's metric set.
#[derive(Debug, Clone, Default)]
pub struct EmitterMetrics {
    /// Registrations published by the event-driven path.
    pub routes_registered: Counter,
    /// Unregistrations published by any path.
    pub routes_unregistered: Counter,
    /// Registrations published by sync and heartbeat emits.
    pub routes_synced: Counter,
    /// Full syncs aborted because a fetch failed.
    pub sync_failures: Counter,
    /// Current `hostnames × endpoints` total across the table.
    pub routes_total: Gauge,
    /// Wall time of the last completed full sync.
    pub sync_duration_ms: Gauge,
}

impl EmitterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render the set in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP routeplane_routes_registered_total Registrations emitted by the watcher.\n");
        out.push_str("# TYPE routeplane_routes_registered_total counter\n");
        out.push_str(&format!(
            "routeplane_routes_registered_total {}\n",
            self.routes_registered.value()
        ));

        out.push_str("# HELP routeplane_routes_unregistered_total Unregistrations emitted.\n");
        out.push_str("# TYPE routeplane_routes_unregistered_total counter\n");
        out.push_str(&format!(
            "routeplane_routes_unregistered_total {}\n",
            self.routes_unregistered.value()
        ));

        out.push_str("# HELP routeplane_routes_synced_total Registrations emitted by sync and heartbeat.\n");
        out.push_str("# TYPE routeplane_routes_synced_total counter\n");
        out.push_str(&format!(
            "routeplane_routes_synced_total {}\n",
            self.routes_synced.value()
        ));

        out.push_str("# HELP routeplane_sync_failures_total Full syncs aborted on fetch failure.\n");
        out.push_str("# TYPE routeplane_sync_failures_total counter\n");
        out.push_str(&format!(
            "routeplane_sync_failures_total {}\n",
            self.sync_failures.value()
        ));

        out.push_str("# HELP routeplane_routes_total Current routable hostname-endpoint pairs.\n");
        out.push_str("# TYPE routeplane_routes_total gauge\n");
        out.push_str(&format!("routeplane_routes_total {}\n", self.routes_total.value()));

        out.push_str("# HELP routeplane_sync_duration_ms Wall time of the last full sync.\n");
        out.push_str("# TYPE routeplane_sync_duration_ms gauge\n");
        out.push_str(&format!(
            "routeplane_sync_duration_ms {}\n",
            self.sync_duration_ms.value()
        ));

        out
    }
}
