//! Orchestrator record types.
//!
//! These mirror the shapes the orchestrator reports over its list and
//! event APIs: desired records describe what the operator asked for,
//! actual records describe what is presently scheduled and running.

use serde::{Deserialize, Serialize};

use crate::routing_info::RoutingInfo;

/// Identifier of a long-running process (the unit of desire).
pub type ProcessId = String;

/// Identifier of one running instance of a process.
pub type InstanceId = String;

/// Opaque ordering token the orchestrator attaches to records.
///
/// Tag A supersedes tag B when A's epoch differs from B's, or when the
/// epochs match and A's index is greater. Records without a tag are
/// treated as always applicable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationTag {
    pub epoch: String,
    pub index: u32,
}

impl ModificationTag {
    pub fn new(epoch: impl Into<String>, index: u32) -> Self {
        Self {
            epoch: epoch.into(),
            index,
        }
    }

    /// Whether `other` supersedes this tag.
    pub fn succeeded_by(&self, other: &ModificationTag) -> bool {
        self.epoch != other.epoch || self.index < other.index
    }
}

/// Whether a mutation carrying `incoming` may replace state stamped
/// with `current`. A missing tag on either side always applies.
pub fn tag_succeeded_by(
    current: Option<&ModificationTag>,
    incoming: Option<&ModificationTag>,
) -> bool {
    match (current, incoming) {
        (Some(current), Some(incoming)) => current.succeeded_by(incoming),
        _ => true,
    }
}

/// Whether a removal carrying `incoming` may delete state stamped with
/// `current`. Equal tags allow the removal; only a strictly newer
/// stored tag blocks it.
pub fn tag_allows_removal(
    current: Option<&ModificationTag>,
    incoming: Option<&ModificationTag>,
) -> bool {
    match (current, incoming) {
        (Some(current), Some(incoming)) => {
            current == incoming || current.succeeded_by(incoming)
        }
        _ => true,
    }
}

/// Scheduler-reported lifecycle state of an actual instance.
///
/// Only `Running` instances contribute routable endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Unclaimed,
    Claimed,
    Running,
    Crashed,
}

/// One host-to-container port mapping on a running instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host_port: u16,
    pub container_port: u16,
}

/// Operator-declared target state for one process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredRecord {
    pub process_id: ProcessId,
    /// Container ports the process declares. Routes are only keyed on
    /// ports that appear both here and in the routing-info blob.
    pub ports: Vec<u16>,
    /// Key-addressed routing blob; see [`crate::routing_info`].
    #[serde(default)]
    pub routing_info: RoutingInfo,
    /// Identifier under which the process's router traffic is logged.
    pub log_id: String,
    #[serde(default)]
    pub modification_tag: Option<ModificationTag>,
}

/// Scheduler-reported state of one instance of a process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActualRecord {
    pub process_id: ProcessId,
    pub instance_id: InstanceId,
    pub cell_id: String,
    pub state: InstanceState,
    /// Externally reachable host address of the cell.
    pub address: String,
    #[serde(default)]
    pub ports: Vec<PortMapping>,
    /// Set while the instance drains off a shutting-down cell.
    #[serde(default)]
    pub evacuating: bool,
    #[serde(default)]
    pub modification_tag: Option<ModificationTag>,
}
