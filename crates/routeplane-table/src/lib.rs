//! routeplane-table — the in-memory routing table.
//!
//! The authoritative association between routing keys, hostnames and
//! running endpoints. Every mutation returns the minimal set of
//! register/unregister messages describing the state transition it
//! caused, so callers can hand the diff straight to the emitter.
//!
//! # Architecture
//!
//! ```text
//! RoutingTable (single mutex around RoutingKey → RoutableEntry)
//!   ├── set_routes / remove_routes        ← desired-side mutations
//!   ├── add_or_update_endpoint / remove_endpoint ← actual-side mutations
//!   ├── swap(target)                      ← full-sync replacement
//!   └── messages_to_emit / route_count    ← readers
//!
//! by_key builders fold orchestrator record lists into a fresh table
//! for swap.
//! ```

pub mod by_key;
pub mod entry;
pub mod message;
pub mod table;

pub use by_key::{
    endpoints_by_routing_key, endpoints_from_actual, routes_by_routing_key, routing_keys_from_actual,
    routing_keys_from_desired,
};
pub use entry::{Endpoint, EndpointKey, Routes, RoutingKey};
pub use message::{MessagesToEmit, RegistryMessage};
pub use table::RoutingTable;
