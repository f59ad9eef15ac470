//! Routing keys, endpoints and table entries.

use std::collections::{BTreeMap, BTreeSet};

use routeplane_core::{InstanceId, ModificationTag, ProcessId};

/// The unit of fan-in: all hostnames and all endpoints belonging to
/// one process exposing one container port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutingKey {
    pub process_id: ProcessId,
    pub container_port: u16,
}

impl RoutingKey {
    pub fn new(process_id: impl Into<ProcessId>, container_port: u16) -> Self {
        Self {
            process_id: process_id.into(),
            container_port,
        }
    }
}

/// Map key for endpoints within an entry.
///
/// Identity includes the evacuating flag so a draining replica can
/// briefly coexist with its non-evacuating sibling.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointKey {
    pub instance_id: InstanceId,
    pub evacuating: bool,
}

/// One running backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint {
    pub instance_id: InstanceId,
    pub host: String,
    /// Externally reachable host port.
    pub port: u16,
    pub container_port: u16,
    pub evacuating: bool,
    pub modification_tag: Option<ModificationTag>,
}

impl Endpoint {
    pub fn key(&self) -> EndpointKey {
        EndpointKey {
            instance_id: self.instance_id.clone(),
            evacuating: self.evacuating,
        }
    }
}

/// The declared routing contract for one key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Routes {
    pub hostnames: Vec<String>,
    pub log_id: String,
    pub route_service_url: Option<String>,
    pub modification_tag: Option<ModificationTag>,
}

/// Per-key aggregate row of the routing table.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RoutableEntry {
    pub hostnames: BTreeSet<String>,
    pub endpoints: BTreeMap<EndpointKey, Endpoint>,
    pub log_id: String,
    pub route_service_url: Option<String>,
    pub modification_tag: Option<ModificationTag>,
}

impl RoutableEntry {
    /// Whether the entry holds this logical instance under either
    /// evacuating variant.
    pub fn has_endpoint(&self, endpoint: &Endpoint) -> bool {
        let mut key = endpoint.key();
        if self.endpoints.contains_key(&key) {
            return true;
        }
        key.evacuating = !key.evacuating;
        self.endpoints.contains_key(&key)
    }

    pub fn has_hostname(&self, hostname: &str) -> bool {
        self.hostnames.contains(hostname)
    }

    /// The declared side of the entry, hostnames in sorted order.
    pub fn routes(&self) -> Routes {
        Routes {
            hostnames: self.hostnames.iter().cloned().collect(),
            log_id: self.log_id.clone(),
            route_service_url: self.route_service_url.clone(),
            modification_tag: self.modification_tag.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hostnames.is_empty() && self.endpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(instance: &str, evacuating: bool) -> Endpoint {
        Endpoint {
            instance_id: instance.to_string(),
            host: "10.0.0.1".to_string(),
            port: 61001,
            container_port: 8080,
            evacuating,
            modification_tag: None,
        }
    }

    #[test]
    fn has_endpoint_matches_either_evacuating_variant() {
        let mut entry = RoutableEntry::default();
        let running = endpoint("instance-1", false);
        entry.endpoints.insert(running.key(), running.clone());

        assert!(entry.has_endpoint(&running));
        assert!(entry.has_endpoint(&endpoint("instance-1", true)));
        assert!(!entry.has_endpoint(&endpoint("instance-2", false)));
    }

    #[test]
    fn evacuating_sibling_gets_its_own_slot() {
        let mut entry = RoutableEntry::default();
        let running = endpoint("instance-1", false);
        let draining = endpoint("instance-1", true);
        entry.endpoints.insert(running.key(), running);
        entry.endpoints.insert(draining.key(), draining);
        assert_eq!(entry.endpoints.len(), 2);
    }

    #[test]
    fn routes_returns_sorted_hostnames() {
        let mut entry = RoutableEntry::default();
        entry.hostnames.insert("b.example.com".to_string());
        entry.hostnames.insert("a.example.com".to_string());
        entry.log_id = "log-1".to_string();

        let routes = entry.routes();
        assert_eq!(routes.hostnames, vec!["a.example.com", "b.example.com"]);
        assert_eq!(routes.log_id, "log-1");
    }
}
