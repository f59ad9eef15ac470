//! Consul-backed coordination.
//!
//! Uses the session + KV-acquire dialect: create a session with a TTL
//! and delete behavior, acquire the lock key with `?acquire=`, renew
//! the session at half the TTL, and destroy it on release. A failed or
//! rejected renewal flips the lease's lost signal.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{CoordinationClient, LockError, LockLease};

pub struct ConsulCoordination {
    authority: String,
}

#[derive(Debug, Deserialize)]
struct SessionCreated {
    #[serde(rename = "ID")]
    id: String,
}

impl ConsulCoordination {
    pub fn new(base_url: &str) -> Result<Self, LockError> {
        let uri: http::Uri = base_url
            .parse()
            .map_err(|_| LockError::Protocol(format!("invalid coordination url: {base_url}")))?;
        let authority = uri
            .authority()
            .ok_or_else(|| {
                LockError::Protocol(format!("coordination url has no authority: {base_url}"))
            })?
            .to_string();
        Ok(Self { authority })
    }

    async fn create_session(&self, name: &str, ttl: Duration) -> Result<String, LockError> {
        let body = serde_json::json!({
            "Name": name,
            "TTL": format!("{}s", ttl.as_secs().max(10)),
            "Behavior": "delete",
            "LockDelay": "1s",
        });
        let (status, body) = http_put(
            &self.authority,
            "/v1/session/create",
            body.to_string().into_bytes(),
        )
        .await?;
        if status != 200 {
            return Err(LockError::Protocol(format!(
                "session create returned status {status}"
            )));
        }
        let created: SessionCreated = serde_json::from_slice(&body)
            .map_err(|err| LockError::Protocol(format!("malformed session response: {err}")))?;
        Ok(created.id)
    }
}

#[async_trait]
impl CoordinationClient for ConsulCoordination {
    async fn try_acquire(
        &self,
        name: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<Option<LockLease>, LockError> {
        let session = self.create_session(name, ttl).await?;

        let path = format!("/v1/kv/{name}?acquire={session}");
        let (status, body) = http_put(&self.authority, &path, owner.as_bytes().to_vec()).await?;
        if status != 200 {
            destroy_session(self.authority.clone(), session);
            return Err(LockError::Protocol(format!(
                "lock acquire returned status {status}"
            )));
        }
        if !body_is_true(&body) {
            // Someone else holds the key; the fresh session is useless.
            destroy_session(self.authority.clone(), session);
            return Ok(None);
        }

        let (lost_tx, lost_rx) = watch::channel(false);
        let renewal = tokio::spawn(renew_loop(
            self.authority.clone(),
            session.clone(),
            ttl,
            lost_tx,
        ));

        let authority = self.authority.clone();
        Ok(Some(LockLease::new(lost_rx, Some(renewal), move || {
            destroy_session(authority, session);
        })))
    }
}

async fn renew_loop(
    authority: String,
    session: String,
    ttl: Duration,
    lost_tx: watch::Sender<bool>,
) {
    let cadence = (ttl / 2).max(Duration::from_secs(1));
    loop {
        tokio::time::sleep(cadence).await;
        let path = format!("/v1/session/renew/{session}");
        match http_put(&authority, &path, Vec::new()).await {
            Ok((200, _)) => debug!(%session, "lock session renewed"),
            Ok((status, _)) => {
                warn!(%session, status, "lock session rejected, lock lost");
                let _ = lost_tx.send(true);
                return;
            }
            Err(err) => {
                warn!(%session, error = %err, "lock session renewal failed, lock lost");
                let _ = lost_tx.send(true);
                return;
            }
        }
    }
}

/// Best-effort session teardown from a sync context.
fn destroy_session(authority: String, session: String) {
    tokio::spawn(async move {
        let path = format!("/v1/session/destroy/{session}");
        if let Err(err) = http_put(&authority, &path, Vec::new()).await {
            debug!(%session, error = %err, "session destroy failed");
        }
    });
}

fn body_is_true(body: &[u8]) -> bool {
    std::str::from_utf8(body)
        .map(|text| text.trim() == "true")
        .unwrap_or(false)
}

async fn http_put(
    authority: &str,
    path_and_query: &str,
    body: Vec<u8>,
) -> Result<(u16, Bytes), LockError> {
    let stream = TcpStream::connect(authority)
        .await
        .map_err(|err| LockError::Unavailable(err.to_string()))?;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake::<_, Full<Bytes>>(io)
        .await
        .map_err(|err| LockError::Unavailable(err.to_string()))?;
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let request = http::Request::builder()
        .method("PUT")
        .uri(path_and_query)
        .header("host", authority)
        .header("user-agent", "routeplane/0.1")
        .body(Full::new(Bytes::from(body)))
        .map_err(|err| LockError::Protocol(err.to_string()))?;

    let response = sender
        .send_request(request)
        .await
        .map_err(|err| LockError::Unavailable(err.to_string()))?;

    let status = response.status().as_u16();
    let body = response
        .into_body()
        .collect()
        .await
        .map_err(|err| LockError::Unavailable(err.to_string()))?
        .to_bytes();
    Ok((status, body))
}
