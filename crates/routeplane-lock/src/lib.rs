//! routeplane-lock — active-passive election via a distributed lock.
//!
//! Only the process holding the named lock runs the watcher and
//! syncer. Acquisition retries on a fixed cadence; a held lease renews
//! itself in the background and flips its `lost` signal if renewal
//! fails, at which point the process must exit and let its supervisor
//! restart it. Losing the lock never emits unregistrations: the
//! router's TTL prunes whatever the next leader does not re-announce.

pub mod consul;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub use consul::ConsulCoordination;
pub use memory::InMemoryCoordination;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("coordination service unavailable: {0}")]
    Unavailable(String),

    #[error("coordination protocol error: {0}")]
    Protocol(String),

    #[error("lock acquisition failed after {0} attempts")]
    AttemptsExhausted(u32),
}

/// A held lock. Dropping the lease aborts renewal and releases the
/// lock.
pub struct LockLease {
    lost: watch::Receiver<bool>,
    renewal: Option<JoinHandle<()>>,
    on_release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockLease {
    pub fn new(
        lost: watch::Receiver<bool>,
        renewal: Option<JoinHandle<()>>,
        on_release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            lost,
            renewal,
            on_release: Some(Box::new(on_release)),
        }
    }

    /// Watch channel that flips to `true` when the lock is lost.
    pub fn lost(&self) -> watch::Receiver<bool> {
        self.lost.clone()
    }
}

impl Drop for LockLease {
    fn drop(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.abort();
        }
        if let Some(release) = self.on_release.take() {
            release();
        }
    }
}

/// The coordination service seam.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// One acquisition attempt. `Ok(None)` means another holder has
    /// the lock.
    async fn try_acquire(
        &self,
        name: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<Option<LockLease>, LockError>;
}

/// Contends for a named lock until it is held or the configured
/// attempt cap runs out.
pub struct LeaderLock {
    coordination: std::sync::Arc<dyn CoordinationClient>,
    name: String,
    owner: String,
    ttl: Duration,
    retry_interval: Duration,
    max_attempts: Option<u32>,
}

impl LeaderLock {
    pub fn new(
        coordination: std::sync::Arc<dyn CoordinationClient>,
        name: impl Into<String>,
        owner: impl Into<String>,
        ttl: Duration,
        retry_interval: Duration,
        max_attempts: Option<u32>,
    ) -> Self {
        Self {
            coordination,
            name: name.into(),
            owner: owner.into(),
            ttl,
            retry_interval,
            max_attempts,
        }
    }

    /// Block until the lock is held. Returns `Ok(None)` if shutdown
    /// was signalled while still contending.
    pub async fn acquire(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<Option<LockLease>, LockError> {
        let mut attempts: u32 = 0;
        loop {
            match self
                .coordination
                .try_acquire(&self.name, &self.owner, self.ttl)
                .await
            {
                Ok(Some(lease)) => {
                    info!(lock = %self.name, owner = %self.owner, "leader lock acquired");
                    return Ok(Some(lease));
                }
                Ok(None) => {
                    debug!(lock = %self.name, "lock held elsewhere, staying passive");
                }
                Err(err) => {
                    warn!(lock = %self.name, error = %err, "lock acquisition attempt failed");
                }
            }

            attempts += 1;
            if let Some(max) = self.max_attempts {
                if attempts >= max {
                    return Err(LockError::AttemptsExhausted(attempts));
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.retry_interval) => {}
                _ = shutdown.changed() => return Ok(None),
            }
        }
    }
}

/// Wait until a lease's lost signal fires. Returns immediately if the
/// lease was already revoked; also treats a vanished signal source as
/// lost.
pub async fn wait_lost(mut lost: watch::Receiver<bool>) {
    loop {
        if *lost.borrow() {
            return;
        }
        if lost.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn leader(
        coordination: Arc<InMemoryCoordination>,
        owner: &str,
        max_attempts: Option<u32>,
    ) -> LeaderLock {
        LeaderLock::new(
            coordination,
            "routeplane-lock",
            owner,
            Duration::from_secs(15),
            Duration::from_millis(10),
            max_attempts,
        )
    }

    #[tokio::test]
    async fn first_contender_wins() {
        let coordination = Arc::new(InMemoryCoordination::new());
        let (_tx, shutdown) = watch::channel(false);

        let lease = leader(coordination.clone(), "a", None)
            .acquire(shutdown)
            .await
            .unwrap();
        assert!(lease.is_some());
        assert_eq!(coordination.holder("routeplane-lock"), Some("a".to_string()));
    }

    #[tokio::test]
    async fn second_contender_waits_for_release() {
        let coordination = Arc::new(InMemoryCoordination::new());
        let (_tx, shutdown) = watch::channel(false);

        let first = leader(coordination.clone(), "a", None)
            .acquire(shutdown.clone())
            .await
            .unwrap()
            .unwrap();

        let contender = {
            let coordination = coordination.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                leader(coordination, "b", None).acquire(shutdown).await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!contender.is_finished());

        drop(first);
        let lease = tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(lease.is_some());
        assert_eq!(coordination.holder("routeplane-lock"), Some("b".to_string()));
    }

    #[tokio::test]
    async fn bounded_attempts_surface_an_error() {
        let coordination = Arc::new(InMemoryCoordination::new());
        let (_tx, shutdown) = watch::channel(false);

        let _held = leader(coordination.clone(), "a", None)
            .acquire(shutdown.clone())
            .await
            .unwrap()
            .unwrap();

        let err = leader(coordination, "b", Some(3)).acquire(shutdown).await;
        assert!(matches!(err, Err(LockError::AttemptsExhausted(3))));
    }

    #[tokio::test]
    async fn shutdown_during_contention_returns_none() {
        let coordination = Arc::new(InMemoryCoordination::new());
        let (tx, shutdown) = watch::channel(false);

        let _held = leader(coordination.clone(), "a", None)
            .acquire(shutdown.clone())
            .await
            .unwrap()
            .unwrap();

        let contender = tokio::spawn(async move {
            leader(coordination, "b", None).acquire(shutdown).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), contender)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn revocation_flips_the_lost_signal() {
        let coordination = Arc::new(InMemoryCoordination::new());
        let (_tx, shutdown) = watch::channel(false);

        let lease = leader(coordination.clone(), "a", None)
            .acquire(shutdown)
            .await
            .unwrap()
            .unwrap();

        let lost = lease.lost();
        coordination.revoke("routeplane-lock");
        tokio::time::timeout(Duration::from_secs(1), wait_lost(lost))
            .await
            .expect("lost signal never fired");
    }
}
