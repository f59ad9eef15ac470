//! Orchestrator change events.

use serde::{Deserialize, Serialize};

use crate::types::{ActualRecord, DesiredRecord};

/// One entry from the orchestrator's event stream.
///
/// A tagged union dispatched on the `type` discriminant; `Changed`
/// variants carry both the before and after images so consumers can
/// detect state transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    DesiredCreated { record: DesiredRecord },
    DesiredChanged { before: DesiredRecord, after: DesiredRecord },
    DesiredRemoved { record: DesiredRecord },
    ActualCreated { record: ActualRecord },
    ActualChanged { before: ActualRecord, after: ActualRecord },
    ActualRemoved { record: ActualRecord },
}

impl ChangeEvent {
    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ChangeEvent::DesiredCreated { .. } => "desired_created",
            ChangeEvent::DesiredChanged { .. } => "desired_changed",
            ChangeEvent::DesiredRemoved { .. } => "desired_removed",
            ChangeEvent::ActualCreated { .. } => "actual_created",
            ChangeEvent::ActualChanged { .. } => "actual_changed",
            ChangeEvent::ActualRemoved { .. } => "actual_removed",
        }
    }
}
