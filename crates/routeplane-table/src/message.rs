//! Router wire messages.

use serde::{Deserialize, Serialize};

use crate::entry::{Endpoint, Routes};

/// The on-wire shape published on the register and unregister
/// subjects. One message describes one endpoint and the hostname set
/// that resolves to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryMessage {
    pub host: String,
    pub port: u16,
    pub uris: Vec<String>,
    pub app: String,
    pub private_instance_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_service_url: Option<String>,
}

impl RegistryMessage {
    pub fn for_endpoint(endpoint: &Endpoint, routes: &Routes) -> Self {
        Self {
            host: endpoint.host.clone(),
            port: endpoint.port,
            uris: routes.hostnames.clone(),
            app: routes.log_id.clone(),
            private_instance_id: endpoint.instance_id.clone(),
            route_service_url: routes.route_service_url.clone(),
        }
    }
}

/// The diff a table mutation produced; the unit the emitter publishes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagesToEmit {
    pub registrations: Vec<RegistryMessage>,
    pub unregistrations: Vec<RegistryMessage>,
}

impl MessagesToEmit {
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty() && self.unregistrations.is_empty()
    }

    pub fn extend(&mut self, other: MessagesToEmit) {
        self.registrations.extend(other.registrations);
        self.unregistrations.extend(other.unregistrations);
    }
}
