//! Process-local coordination.
//!
//! Locks live in a shared map; useful for tests and for running
//! several emitter instances inside one process. `revoke` simulates a
//! session expiry from the coordination service's side.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::{CoordinationClient, LockError, LockLease};

#[derive(Clone, Default)]
pub struct InMemoryCoordination {
    locks: Arc<Mutex<HashMap<String, HeldLock>>>,
}

struct HeldLock {
    owner: String,
    lost_tx: watch::Sender<bool>,
}

impl InMemoryCoordination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holder of a lock, if any.
    pub fn holder(&self, name: &str) -> Option<String> {
        let locks = self.locks.lock().expect("locks lock");
        locks.get(name).map(|held| held.owner.clone())
    }

    /// Forcibly expire a lock, notifying its holder.
    pub fn revoke(&self, name: &str) {
        let removed = {
            let mut locks = self.locks.lock().expect("locks lock");
            locks.remove(name)
        };
        if let Some(held) = removed {
            let _ = held.lost_tx.send(true);
        }
    }
}

#[async_trait]
impl CoordinationClient for InMemoryCoordination {
    async fn try_acquire(
        &self,
        name: &str,
        owner: &str,
        _ttl: Duration,
    ) -> Result<Option<LockLease>, LockError> {
        let mut locks = self.locks.lock().expect("locks lock");
        if locks.contains_key(name) {
            return Ok(None);
        }

        let (lost_tx, lost_rx) = watch::channel(false);
        locks.insert(
            name.to_string(),
            HeldLock {
                owner: owner.to_string(),
                lost_tx,
            },
        );

        let release_map = self.locks.clone();
        let release_name = name.to_string();
        let release_owner = owner.to_string();
        Ok(Some(LockLease::new(lost_rx, None, move || {
            let mut locks = release_map.lock().expect("locks lock");
            // Only release if this lease's owner still holds it; a
            // revoked-and-reacquired lock belongs to someone else.
            if locks
                .get(&release_name)
                .is_some_and(|held| held.owner == release_owner)
            {
                locks.remove(&release_name);
            }
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_release_reacquire() {
        let coordination = InMemoryCoordination::new();

        let lease = coordination
            .try_acquire("lock", "a", Duration::from_secs(15))
            .await
            .unwrap();
        assert!(lease.is_some());
        assert!(coordination
            .try_acquire("lock", "b", Duration::from_secs(15))
            .await
            .unwrap()
            .is_none());

        drop(lease);
        assert!(coordination
            .try_acquire("lock", "b", Duration::from_secs(15))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn stale_release_does_not_steal_the_lock() {
        let coordination = InMemoryCoordination::new();

        let first = coordination
            .try_acquire("lock", "a", Duration::from_secs(15))
            .await
            .unwrap();
        coordination.revoke("lock");

        let _second = coordination
            .try_acquire("lock", "b", Duration::from_secs(15))
            .await
            .unwrap()
            .unwrap();

        // The revoked lease releasing must not evict the new holder.
        drop(first);
        assert_eq!(coordination.holder("lock"), Some("b".to_string()));
    }
}
