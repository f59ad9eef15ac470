//! Routing-info blob codec.
//!
//! Desired records carry an opaque key-addressed map of routing data
//! for arbitrary routers. The HTTP router's rules live under the
//! `cf-router` key as a JSON array of `{hostnames, port,
//! route_service_url?}` objects. A missing key or a null value means
//! the record declares no HTTP routes; malformed JSON under the key is
//! an error confined to that record.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Routing-info key claimed by the HTTP router.
pub const HTTP_ROUTER_KEY: &str = "cf-router";

/// The opaque blob as carried on a desired record.
pub type RoutingInfo = BTreeMap<String, Option<serde_json::Value>>;

/// One rule from the HTTP router's section of the blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRule {
    pub hostnames: Vec<String>,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_service_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum RoutingInfoError {
    #[error("malformed routing info under {HTTP_ROUTER_KEY:?}: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Extract the HTTP router's rules from a routing-info blob.
///
/// Missing key and null value both yield an empty rule set.
pub fn routes_from_info(info: &RoutingInfo) -> Result<Vec<RouteRule>, RoutingInfoError> {
    match info.get(HTTP_ROUTER_KEY) {
        Some(Some(value)) => Ok(serde_json::from_value(value.clone())?),
        _ => Ok(Vec::new()),
    }
}

/// Build a routing-info blob from a set of rules.
pub fn routing_info_for(rules: &[RouteRule]) -> RoutingInfo {
    let mut info = RoutingInfo::new();
    let value = serde_json::to_value(rules).unwrap_or(serde_json::Value::Array(Vec::new()));
    info.insert(HTTP_ROUTER_KEY.to_string(), Some(value));
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(hostnames: &[&str], port: u16) -> RouteRule {
        RouteRule {
            hostnames: hostnames.iter().map(|h| h.to_string()).collect(),
            port,
            route_service_url: None,
        }
    }

    #[test]
    fn round_trips_rules() {
        let rules = vec![rule(&["a.example.com", "b.example.com"], 8080), rule(&["c.example.com"], 9090)];
        let info = routing_info_for(&rules);
        assert_eq!(routes_from_info(&info).unwrap(), rules);
    }

    #[test]
    fn missing_key_is_empty() {
        let info = RoutingInfo::new();
        assert!(routes_from_info(&info).unwrap().is_empty());
    }

    #[test]
    fn null_value_is_empty() {
        let mut info = RoutingInfo::new();
        info.insert(HTTP_ROUTER_KEY.to_string(), None);
        assert!(routes_from_info(&info).unwrap().is_empty());
    }

    #[test]
    fn foreign_keys_are_ignored() {
        let mut info = routing_info_for(&[rule(&["a.example.com"], 8080)]);
        info.insert(
            "tcp-router".to_string(),
            Some(serde_json::json!([{"external_port": 5222}])),
        );
        assert_eq!(routes_from_info(&info).unwrap().len(), 1);
    }

    #[test]
    fn malformed_section_is_an_error() {
        let mut info = RoutingInfo::new();
        info.insert(
            HTTP_ROUTER_KEY.to_string(),
            Some(serde_json::json!({"not": "an array"})),
        );
        assert!(routes_from_info(&info).is_err());
    }

    #[test]
    fn route_service_url_survives() {
        let rules = vec![RouteRule {
            hostnames: vec!["a.example.com".to_string()],
            port: 8080,
            route_service_url: Some("https://rs.example.com".to_string()),
        }];
        let info = routing_info_for(&rules);
        let parsed = routes_from_info(&info).unwrap();
        assert_eq!(
            parsed[0].route_service_url.as_deref(),
            Some("https://rs.example.com")
        );
    }
}
