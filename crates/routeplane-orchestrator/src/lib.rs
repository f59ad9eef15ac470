//! routeplane-orchestrator — the orchestrator's client seam.
//!
//! The watcher and syncer consume the orchestrator exclusively through
//! [`OrchestratorClient`] and [`EventSource`]. [`InMemoryOrchestrator`]
//! backs tests and in-process deployments; [`HttpOrchestratorClient`]
//! talks to a remote store over JSON lists and an NDJSON event stream.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use routeplane_core::{ActualRecord, ChangeEvent, DesiredRecord};

pub use self::http::HttpOrchestratorClient;
pub use self::memory::InMemoryOrchestrator;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("orchestrator unavailable: {0}")]
    Unavailable(String),

    #[error("orchestrator call timed out")]
    Timeout,

    #[error("orchestrator protocol error: {0}")]
    Protocol(String),

    #[error("event stream closed")]
    StreamClosed,
}

/// Read access to the orchestrator's desired and actual state.
#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    async fn list_desired(&self) -> Result<Vec<DesiredRecord>, OrchestratorError>;

    async fn list_actual(&self) -> Result<Vec<ActualRecord>, OrchestratorError>;

    async fn subscribe_events(&self) -> Result<Box<dyn EventSource>, OrchestratorError>;
}

/// A live event stream; dropping it closes the subscription.
#[async_trait]
pub trait EventSource: Send {
    /// Await the next change event.
    async fn next_event(&mut self) -> Result<ChangeEvent, OrchestratorError>;
}
