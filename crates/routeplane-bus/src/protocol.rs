//! Router bus subjects and handshake payloads.

use serde::{Deserialize, Serialize};

/// Published by the emitter with a reply subject attached.
pub const ROUTER_GREET: &str = "router.greet";
/// Published by the router, unsolicited or as a greet reply.
pub const ROUTER_START: &str = "router.start";
/// Registration announcements.
pub const ROUTER_REGISTER: &str = "router.register";
/// Unregistration announcements.
pub const ROUTER_UNREGISTER: &str = "router.unregister";

/// The router's `router.start` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStart {
    /// Cadence at which registrations must be re-announced to stay
    /// ahead of the router's TTL pruning.
    #[serde(rename = "minimumRegisterIntervalInSeconds")]
    pub minimum_register_interval_in_seconds: u64,

    #[serde(rename = "pruneThresholdInSeconds", default)]
    pub prune_threshold_in_seconds: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_router_start_shape() {
        let start: RouterStart = serde_json::from_str(
            r#"{"minimumRegisterIntervalInSeconds":20,"pruneThresholdInSeconds":120}"#,
        )
        .unwrap();
        assert_eq!(start.minimum_register_interval_in_seconds, 20);
        assert_eq!(start.prune_threshold_in_seconds, 120);
    }

    #[test]
    fn prune_threshold_is_optional() {
        let start: RouterStart =
            serde_json::from_str(r#"{"minimumRegisterIntervalInSeconds":1}"#).unwrap();
        assert_eq!(start.minimum_register_interval_in_seconds, 1);
        assert_eq!(start.prune_threshold_in_seconds, 0);
    }
}
