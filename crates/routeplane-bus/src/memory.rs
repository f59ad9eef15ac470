//! In-process bus.
//!
//! Exact-subject fan-out backed by per-subscriber channels. Used by
//! tests and by single-process deployments where the router runs in
//! the same binary. A disconnect toggle reproduces the fail-fast
//! behavior of a dropped connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::{BusError, BusMessage, MessageBus, Subscription};

const SUBSCRIPTION_BUFFER: usize = 256;

#[derive(Clone, Default)]
pub struct InProcessBus {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    subscribers: Mutex<HashMap<String, Vec<mpsc::Sender<BusMessage>>>>,
    disconnected: AtomicBool,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a dropped bus connection: publishes fail fast until
    /// restored.
    pub fn set_disconnected(&self, disconnected: bool) {
        self.inner.disconnected.store(disconnected, Ordering::Relaxed);
    }

    fn deliver(&self, subject: &str, reply: Option<String>, payload: Vec<u8>) -> Result<(), BusError> {
        if self.inner.disconnected.load(Ordering::Relaxed) {
            return Err(BusError::Disconnected);
        }

        let message = BusMessage {
            subject: subject.to_string(),
            reply,
            payload: Bytes::from(payload),
        };

        let mut subscribers = self.inner.subscribers.lock().expect("subscribers lock");
        if let Some(senders) = subscribers.get_mut(subject) {
            // Slow or dropped subscribers are pruned, not waited on.
            senders.retain(|sender| sender.try_send(message.clone()).is_ok());
        }
        Ok(())
    }
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.deliver(subject, None, payload)
    }

    async fn publish_with_reply(
        &self,
        subject: &str,
        reply: &str,
        payload: Vec<u8>,
    ) -> Result<(), BusError> {
        self.deliver(subject, Some(reply.to_string()), payload)
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let mut subscribers = self.inner.subscribers.lock().expect("subscribers lock");
        subscribers.entry(subject.to_string()).or_default().push(tx);
        Ok(Subscription::new(rx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_to_exact_subject() {
        let bus = InProcessBus::new();
        let mut sub = bus.subscribe("router.register").await.unwrap();

        bus.publish("router.register", b"one".to_vec()).await.unwrap();
        bus.publish("router.unregister", b"other".to_vec()).await.unwrap();

        let message = sub.next().await.unwrap();
        assert_eq!(message.subject, "router.register");
        assert_eq!(message.payload.as_ref(), b"one");
        assert!(message.reply.is_none());
    }

    #[tokio::test]
    async fn fans_out_to_every_subscriber() {
        let bus = InProcessBus::new();
        let mut first = bus.subscribe("router.start").await.unwrap();
        let mut second = bus.subscribe("router.start").await.unwrap();

        bus.publish("router.start", b"tick".to_vec()).await.unwrap();

        assert_eq!(first.next().await.unwrap().payload.as_ref(), b"tick");
        assert_eq!(second.next().await.unwrap().payload.as_ref(), b"tick");
    }

    #[tokio::test]
    async fn reply_subject_travels_with_the_message() {
        let bus = InProcessBus::new();
        let mut sub = bus.subscribe("router.greet").await.unwrap();

        bus.publish_with_reply("router.greet", "inbox.1", b"{}".to_vec())
            .await
            .unwrap();

        let message = sub.next().await.unwrap();
        assert_eq!(message.reply.as_deref(), Some("inbox.1"));
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_ok() {
        let bus = InProcessBus::new();
        bus.publish("router.register", b"x".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn disconnected_bus_fails_fast() {
        let bus = InProcessBus::new();
        bus.set_disconnected(true);

        let err = bus.publish("router.register", b"x".to_vec()).await;
        assert!(matches!(err, Err(BusError::Disconnected)));

        bus.set_disconnected(false);
        bus.publish("router.register", b"x".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn dropped_subscriber_is_pruned() {
        let bus = InProcessBus::new();
        let sub = bus.subscribe("router.register").await.unwrap();
        drop(sub);

        bus.publish("router.register", b"x".to_vec()).await.unwrap();
        let subscribers = bus.inner.subscribers.lock().unwrap();
        assert!(subscribers.get("router.register").unwrap().is_empty());
    }
}
