//! In-memory orchestrator.
//!
//! Holds desired and actual records behind locks and broadcasts a
//! change event for every mutation, mirroring what the remote store's
//! event feed would deliver. Failure injection flips the list and
//! subscribe calls into errors so reconciliation paths can be
//! exercised.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;

use routeplane_core::{ActualRecord, ChangeEvent, DesiredRecord, InstanceId, ProcessId};

use crate::{EventSource, OrchestratorClient, OrchestratorError};

const EVENT_BUFFER: usize = 256;

type ActualKey = (ProcessId, InstanceId, bool);

#[derive(Clone)]
pub struct InMemoryOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    desired: Mutex<BTreeMap<ProcessId, DesiredRecord>>,
    actual: Mutex<BTreeMap<ActualKey, ActualRecord>>,
    events: broadcast::Sender<ChangeEvent>,
    unavailable: AtomicBool,
}

impl Default for InMemoryOrchestrator {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(Inner {
                desired: Mutex::new(BTreeMap::new()),
                actual: Mutex::new(BTreeMap::new()),
                events,
                unavailable: AtomicBool::new(false),
            }),
        }
    }
}

impl InMemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every client call fail until restored.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Store a desired record and broadcast the matching event.
    pub fn desire(&self, record: DesiredRecord) {
        let before = {
            let mut desired = self.inner.desired.lock().expect("desired lock");
            desired.insert(record.process_id.clone(), record.clone())
        };
        let event = match before {
            Some(before) => ChangeEvent::DesiredChanged {
                before,
                after: record,
            },
            None => ChangeEvent::DesiredCreated { record },
        };
        let _ = self.inner.events.send(event);
    }

    /// Remove a desired record and broadcast the removal.
    pub fn remove_desired(&self, process_id: &str) {
        let removed = {
            let mut desired = self.inner.desired.lock().expect("desired lock");
            desired.remove(process_id)
        };
        if let Some(record) = removed {
            let _ = self.inner.events.send(ChangeEvent::DesiredRemoved { record });
        }
    }

    /// Store an actual record and broadcast the matching event.
    pub fn upsert_actual(&self, record: ActualRecord) {
        let key = actual_key(&record);
        let before = {
            let mut actual = self.inner.actual.lock().expect("actual lock");
            actual.insert(key, record.clone())
        };
        let event = match before {
            Some(before) => ChangeEvent::ActualChanged {
                before,
                after: record,
            },
            None => ChangeEvent::ActualCreated { record },
        };
        let _ = self.inner.events.send(event);
    }

    /// Remove an actual record and broadcast the removal.
    pub fn remove_actual(&self, process_id: &str, instance_id: &str, evacuating: bool) {
        let removed = {
            let mut actual = self.inner.actual.lock().expect("actual lock");
            actual.remove(&(
                process_id.to_string(),
                instance_id.to_string(),
                evacuating,
            ))
        };
        if let Some(record) = removed {
            let _ = self.inner.events.send(ChangeEvent::ActualRemoved { record });
        }
    }

    /// Broadcast a raw event without touching the stores.
    pub fn emit_event(&self, event: ChangeEvent) {
        let _ = self.inner.events.send(event);
    }

    fn check_available(&self) -> Result<(), OrchestratorError> {
        if self.inner.unavailable.load(Ordering::Relaxed) {
            return Err(OrchestratorError::Unavailable(
                "injected failure".to_string(),
            ));
        }
        Ok(())
    }
}

fn actual_key(record: &ActualRecord) -> ActualKey {
    (
        record.process_id.clone(),
        record.instance_id.clone(),
        record.evacuating,
    )
}

#[async_trait]
impl OrchestratorClient for InMemoryOrchestrator {
    async fn list_desired(&self) -> Result<Vec<DesiredRecord>, OrchestratorError> {
        self.check_available()?;
        let desired = self.inner.desired.lock().expect("desired lock");
        Ok(desired.values().cloned().collect())
    }

    async fn list_actual(&self) -> Result<Vec<ActualRecord>, OrchestratorError> {
        self.check_available()?;
        let actual = self.inner.actual.lock().expect("actual lock");
        Ok(actual.values().cloned().collect())
    }

    async fn subscribe_events(&self) -> Result<Box<dyn EventSource>, OrchestratorError> {
        self.check_available()?;
        Ok(Box::new(MemoryEventSource {
            rx: self.inner.events.subscribe(),
        }))
    }
}

struct MemoryEventSource {
    rx: broadcast::Receiver<ChangeEvent>,
}

#[async_trait]
impl EventSource for MemoryEventSource {
    async fn next_event(&mut self) -> Result<ChangeEvent, OrchestratorError> {
        match self.rx.recv().await {
            Ok(event) => Ok(event),
            Err(broadcast::error::RecvError::Closed) => Err(OrchestratorError::StreamClosed),
            Err(broadcast::error::RecvError::Lagged(missed)) => Err(OrchestratorError::Protocol(
                format!("event stream lagged by {missed} events"),
            )),
        }
    }
}
