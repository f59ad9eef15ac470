//! routeplane-core — domain types shared across the route emitter.
//!
//! Holds the orchestrator-facing record types (desired and actual
//! long-running processes), the modification-tag ordering rules, the
//! routing-info blob codec, the change-event sum type, and the
//! process configuration.

pub mod config;
pub mod events;
pub mod routing_info;
pub mod types;

pub use config::Config;
pub use events::ChangeEvent;
pub use routing_info::{routes_from_info, routing_info_for, RouteRule, RoutingInfo};
pub use types::{
    tag_allows_removal, tag_succeeded_by, ActualRecord, DesiredRecord, InstanceId, InstanceState,
    ModificationTag, PortMapping, ProcessId,
};
