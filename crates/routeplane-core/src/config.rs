//! Process configuration.
//!
//! Loaded from an optional TOML file and overridden by CLI flags in
//! the daemon. Every field has a default so a bare `routeplaned run`
//! works against local development endpoints.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name announced on the bus and used to derive the lock owner.
    pub session_name: String,
    /// Bus server addresses, tried in order.
    pub bus_addresses: Vec<String>,
    /// Base URL of the orchestrator's HTTP API.
    pub orchestrator_url: String,
    /// Base URL of the coordination service holding the leader lock.
    pub coordination_url: String,
    /// Timeout applied to orchestrator and coordination calls.
    pub communication_timeout_ms: u64,
    /// Cadence of the periodic full reconciliation.
    pub sync_interval_secs: u64,
    /// Cadence of greet retries while the router has not answered.
    pub greet_retry_interval_secs: u64,
    /// Cadence of leader-lock acquisition retries.
    pub lock_retry_interval_secs: u64,
    /// TTL requested for the leader lock's session.
    pub lock_ttl_secs: u64,
    /// Give up after this many failed acquisition attempts (unbounded
    /// when absent).
    pub lock_max_attempts: Option<u32>,
    /// How long components get to stop after the shutdown signal.
    pub shutdown_grace_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_name: "routeplane".to_string(),
            bus_addresses: vec!["127.0.0.1:4222".to_string()],
            orchestrator_url: "http://127.0.0.1:8889".to_string(),
            coordination_url: "http://127.0.0.1:8500".to_string(),
            communication_timeout_ms: 10_000,
            sync_interval_secs: 60,
            greet_retry_interval_secs: 1,
            lock_retry_interval_secs: 5,
            lock_ttl_secs: 15,
            lock_max_attempts: None,
            shutdown_grace_secs: 5,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn communication_timeout(&self) -> Duration {
        Duration::from_millis(self.communication_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn greet_retry_interval(&self) -> Duration {
        Duration::from_secs(self.greet_retry_interval_secs)
    }

    pub fn lock_retry_interval(&self) -> Duration {
        Duration::from_secs(self.lock_retry_interval_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}
