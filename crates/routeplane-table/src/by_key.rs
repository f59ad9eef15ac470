//! Builders folding orchestrator record lists into table inputs.

use std::collections::HashMap;

use tracing::warn;

use routeplane_core::{routes_from_info, ActualRecord, DesiredRecord, InstanceState};

use crate::entry::{Endpoint, Routes, RoutingKey};

/// Fold desired records into per-key route declarations.
///
/// A record's routes are keyed only on container ports present both in
/// its top-level port list and in the routing blob; a malformed blob
/// skips that record alone.
pub fn routes_by_routing_key(desireds: &[DesiredRecord]) -> HashMap<RoutingKey, Routes> {
    let mut routes = HashMap::new();
    for desired in desireds {
        let rules = match routes_from_info(&desired.routing_info) {
            Ok(rules) => rules,
            Err(err) => {
                warn!(process_id = %desired.process_id, error = %err, "skipping desired record with malformed routing info");
                continue;
            }
        };

        for rule in rules {
            if !desired.ports.contains(&rule.port) {
                continue;
            }
            let key = RoutingKey::new(desired.process_id.clone(), rule.port);
            routes.insert(
                key,
                Routes {
                    hostnames: rule.hostnames,
                    log_id: desired.log_id.clone(),
                    route_service_url: rule.route_service_url,
                    modification_tag: desired.modification_tag.clone(),
                },
            );
        }
    }
    routes
}

/// Fold actual records into per-key endpoint lists.
///
/// Only running instances contribute; records without port mappings
/// are skipped.
pub fn endpoints_by_routing_key(actuals: &[ActualRecord]) -> HashMap<RoutingKey, Vec<Endpoint>> {
    let mut endpoints: HashMap<RoutingKey, Vec<Endpoint>> = HashMap::new();
    for actual in actuals {
        if actual.state != InstanceState::Running {
            continue;
        }
        for (container_port, endpoint) in endpoints_from_actual(actual) {
            let key = RoutingKey::new(actual.process_id.clone(), container_port);
            endpoints.entry(key).or_default().push(endpoint);
        }
    }
    endpoints
}

/// Endpoints of one actual record, keyed by container port.
pub fn endpoints_from_actual(actual: &ActualRecord) -> HashMap<u16, Endpoint> {
    let mut endpoints = HashMap::new();
    for mapping in &actual.ports {
        endpoints.insert(
            mapping.container_port,
            Endpoint {
                instance_id: actual.instance_id.clone(),
                host: actual.address.clone(),
                port: mapping.host_port,
                container_port: mapping.container_port,
                evacuating: actual.evacuating,
                modification_tag: actual.modification_tag.clone(),
            },
        );
    }
    endpoints
}

/// Routing keys an actual record addresses, one per port mapping.
pub fn routing_keys_from_actual(actual: &ActualRecord) -> Vec<RoutingKey> {
    actual
        .ports
        .iter()
        .map(|mapping| RoutingKey::new(actual.process_id.clone(), mapping.container_port))
        .collect()
}

/// Routing keys a desired record addresses, one per declared port.
pub fn routing_keys_from_desired(desired: &DesiredRecord) -> Vec<RoutingKey> {
    desired
        .ports
        .iter()
        .map(|port| RoutingKey::new(desired.process_id.clone(), *port))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use routeplane_core::{routing_info_for, PortMapping, RouteRule, RoutingInfo};

    fn desired(process_id: &str, ports: &[u16], rules: &[RouteRule]) -> DesiredRecord {
        DesiredRecord {
            process_id: process_id.to_string(),
            ports: ports.to_vec(),
            routing_info: routing_info_for(rules),
            log_id: "log-1".to_string(),
            modification_tag: None,
        }
    }

    fn rule(hostnames: &[&str], port: u16) -> RouteRule {
        RouteRule {
            hostnames: hostnames.iter().map(|h| h.to_string()).collect(),
            port,
            route_service_url: None,
        }
    }

    fn running(process_id: &str, instance_id: &str, mappings: &[(u16, u16)]) -> ActualRecord {
        ActualRecord {
            process_id: process_id.to_string(),
            instance_id: instance_id.to_string(),
            cell_id: "cell-1".to_string(),
            state: InstanceState::Running,
            address: "1.2.3.4".to_string(),
            ports: mappings
                .iter()
                .map(|(host_port, container_port)| PortMapping {
                    host_port: *host_port,
                    container_port: *container_port,
                })
                .collect(),
            evacuating: false,
            modification_tag: None,
        }
    }

    #[test]
    fn routes_keyed_per_rule_port() {
        let routes = routes_by_routing_key(&[desired(
            "process-1",
            &[8080, 9090],
            &[rule(&["a.example.com"], 8080), rule(&["b.example.com"], 9090)],
        )]);

        assert_eq!(routes.len(), 2);
        let key = RoutingKey::new("process-1", 8080);
        assert_eq!(routes[&key].hostnames, vec!["a.example.com"]);
        assert_eq!(routes[&key].log_id, "log-1");
    }

    #[test]
    fn blob_only_ports_produce_no_routes() {
        let routes = routes_by_routing_key(&[desired(
            "process-1",
            &[8080],
            &[rule(&["a.example.com"], 8080), rule(&["ghost.example.com"], 7777)],
        )]);

        assert_eq!(routes.len(), 1);
        assert!(routes.contains_key(&RoutingKey::new("process-1", 8080)));
    }

    #[test]
    fn malformed_blob_skips_only_that_record() {
        let mut bad_info = RoutingInfo::new();
        bad_info.insert(
            routeplane_core::routing_info::HTTP_ROUTER_KEY.to_string(),
            Some(serde_json::json!("not-an-array")),
        );
        let bad = DesiredRecord {
            process_id: "bad".to_string(),
            ports: vec![8080],
            routing_info: bad_info,
            log_id: "log-bad".to_string(),
            modification_tag: None,
        };
        let good = desired("good", &[8080], &[rule(&["a.example.com"], 8080)]);

        let routes = routes_by_routing_key(&[bad, good]);
        assert_eq!(routes.len(), 1);
        assert!(routes.contains_key(&RoutingKey::new("good", 8080)));
    }

    #[test]
    fn only_running_actuals_become_endpoints() {
        let mut claimed = running("process-1", "instance-2", &[(61002, 8080)]);
        claimed.state = InstanceState::Claimed;

        let endpoints = endpoints_by_routing_key(&[
            running("process-1", "instance-1", &[(61001, 8080)]),
            claimed,
        ]);

        let key = RoutingKey::new("process-1", 8080);
        assert_eq!(endpoints[&key].len(), 1);
        assert_eq!(endpoints[&key][0].instance_id, "instance-1");
        assert_eq!(endpoints[&key][0].port, 61001);
    }

    #[test]
    fn actual_without_ports_is_skipped() {
        let endpoints = endpoints_by_routing_key(&[running("process-1", "instance-1", &[])]);
        assert!(endpoints.is_empty());
    }

    #[test]
    fn multiple_port_mappings_fan_out_to_keys() {
        let actual = running("process-1", "instance-1", &[(61001, 8080), (61002, 9090)]);

        let keys = routing_keys_from_actual(&actual);
        assert_eq!(keys.len(), 2);

        let endpoints = endpoints_from_actual(&actual);
        assert_eq!(endpoints[&8080].port, 61001);
        assert_eq!(endpoints[&9090].port, 61002);
    }

    #[test]
    fn desired_keys_follow_declared_ports() {
        let keys = routing_keys_from_desired(&desired("process-1", &[8080, 9090], &[]));
        assert_eq!(
            keys,
            vec![
                RoutingKey::new("process-1", 8080),
                RoutingKey::new("process-1", 9090)
            ]
        );
    }
}
