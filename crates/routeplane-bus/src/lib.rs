//! routeplane-bus — the pub/sub seam between the emitter and the router.
//!
//! The core components speak to the router through the [`MessageBus`]
//! trait. Two implementations ship here: [`InProcessBus`] for tests
//! and single-process deployments, and [`NatsBus`], a minimal client
//! for the router's native NATS text protocol.

pub mod memory;
pub mod nats;
pub mod protocol;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

pub use memory::InProcessBus;
pub use nats::NatsBus;
pub use protocol::{RouterStart, ROUTER_GREET, ROUTER_REGISTER, ROUTER_START, ROUTER_UNREGISTER};

/// One message delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub subject: String,
    /// Reply subject attached by the publisher, if any.
    pub reply: Option<String>,
    pub payload: Bytes,
}

/// A live subscription; dropped to unsubscribe.
#[derive(Debug)]
pub struct Subscription {
    rx: mpsc::Receiver<BusMessage>,
}

impl Subscription {
    pub fn new(rx: mpsc::Receiver<BusMessage>) -> Self {
        Self { rx }
    }

    /// The next message, or `None` once the bus is gone.
    pub async fn next(&mut self) -> Option<BusMessage> {
        self.rx.recv().await
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    /// The connection is absent; publishes fail fast and the caller's
    /// periodic re-announce supplies recovery.
    #[error("bus disconnected")]
    Disconnected,

    #[error("bus i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bus protocol error: {0}")]
    Protocol(String),
}

/// Publish/subscribe access to the router's bus.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;

    async fn publish_with_reply(
        &self,
        subject: &str,
        reply: &str,
        payload: Vec<u8>,
    ) -> Result<(), BusError>;

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError>;
}
