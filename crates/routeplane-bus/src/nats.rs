//! Minimal NATS client.
//!
//! Speaks just enough of the NATS text protocol for the router
//! handshake and announcement traffic: INFO/CONNECT on session setup,
//! PING/PONG keepalive, SUB with client-assigned sids, PUB with an
//! optional reply subject, and MSG dispatch. A background task owns
//! the read side, reconnects with a fixed backoff, and replays
//! subscriptions after every reconnect. While the connection is down
//! publishes fail fast; nothing is queued.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{BusError, BusMessage, MessageBus, Subscription};

const SUBSCRIPTION_BUFFER: usize = 256;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

pub struct NatsBus {
    inner: Arc<NatsInner>,
}

struct NatsInner {
    addresses: Vec<String>,
    session_name: String,
    writer: tokio::sync::Mutex<Option<OwnedWriteHalf>>,
    subscriptions: Mutex<HashMap<u64, SubscriptionEntry>>,
    next_sid: AtomicU64,
    connected: AtomicBool,
}

struct SubscriptionEntry {
    subject: String,
    tx: mpsc::Sender<BusMessage>,
}

impl NatsBus {
    /// Connect to the first reachable address. The initial connection
    /// must succeed; later drops are handled by the background
    /// reconnect loop.
    pub async fn connect(addresses: &[String], session_name: &str) -> Result<Self, BusError> {
        let inner = Arc::new(NatsInner {
            addresses: addresses.to_vec(),
            session_name: session_name.to_string(),
            writer: tokio::sync::Mutex::new(None),
            subscriptions: Mutex::new(HashMap::new()),
            next_sid: AtomicU64::new(0),
            connected: AtomicBool::new(false),
        });

        let stream = establish(&inner.addresses).await?;
        let reader = attach(&inner, stream).await?;
        tokio::spawn(supervise(Arc::downgrade(&inner), reader));

        Ok(Self { inner })
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Relaxed)
    }

    async fn send(&self, frame: Vec<u8>) -> Result<(), BusError> {
        send_frame(&self.inner, frame).await
    }
}

#[async_trait]
impl MessageBus for NatsBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        self.send(publish_frame(subject, None, &payload)).await
    }

    async fn publish_with_reply(
        &self,
        subject: &str,
        reply: &str,
        payload: Vec<u8>,
    ) -> Result<(), BusError> {
        self.send(publish_frame(subject, Some(reply), &payload)).await
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        let sid = self.inner.next_sid.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        {
            let mut subscriptions = self.inner.subscriptions.lock().expect("subscriptions lock");
            subscriptions.insert(
                sid,
                SubscriptionEntry {
                    subject: subject.to_string(),
                    tx,
                },
            );
        }

        // A send failure is fine here: the registration is replayed on
        // the next reconnect.
        if let Err(err) = self.send(format!("SUB {subject} {sid}\r\n").into_bytes()).await {
            debug!(subject, error = %err, "subscription deferred until reconnect");
        }
        Ok(Subscription::new(rx))
    }
}

async fn send_frame(inner: &NatsInner, frame: Vec<u8>) -> Result<(), BusError> {
    let mut writer = inner.writer.lock().await;
    let Some(write_half) = writer.as_mut() else {
        return Err(BusError::Disconnected);
    };
    if let Err(err) = write_half.write_all(&frame).await {
        *writer = None;
        inner.connected.store(false, Ordering::Relaxed);
        return Err(BusError::Io(err));
    }
    Ok(())
}

fn publish_frame(subject: &str, reply: Option<&str>, payload: &[u8]) -> Vec<u8> {
    let header = match reply {
        Some(reply) => format!("PUB {subject} {reply} {}\r\n", payload.len()),
        None => format!("PUB {subject} {}\r\n", payload.len()),
    };
    let mut frame = header.into_bytes();
    frame.extend_from_slice(payload);
    frame.extend_from_slice(b"\r\n");
    frame
}

async fn establish(addresses: &[String]) -> Result<TcpStream, BusError> {
    let mut last_error = None;
    for address in addresses {
        match TcpStream::connect(address).await {
            Ok(stream) => return Ok(stream),
            Err(err) => {
                debug!(%address, error = %err, "bus address unreachable");
                last_error = Some(err);
            }
        }
    }
    match last_error {
        Some(err) => Err(BusError::Io(err)),
        None => Err(BusError::Protocol("no bus addresses configured".to_string())),
    }
}

/// Complete the session handshake on a fresh connection and store its
/// write half: read the server INFO banner, send CONNECT, replay every
/// registered subscription.
async fn attach(
    inner: &Arc<NatsInner>,
    stream: TcpStream,
) -> Result<BufReader<OwnedReadHalf>, BusError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let mut banner = String::new();
    reader.read_line(&mut banner).await?;
    if !banner.starts_with("INFO") {
        return Err(BusError::Protocol(format!(
            "unexpected server banner: {}",
            banner.trim_end()
        )));
    }

    let connect = format!(
        "CONNECT {{\"verbose\":false,\"pedantic\":false,\"name\":{:?}}}\r\n",
        inner.session_name
    );
    write_half.write_all(connect.as_bytes()).await?;

    let replays: Vec<(u64, String)> = {
        let subscriptions = inner.subscriptions.lock().expect("subscriptions lock");
        subscriptions
            .iter()
            .map(|(sid, entry)| (*sid, entry.subject.clone()))
            .collect()
    };
    for (sid, subject) in replays {
        write_half
            .write_all(format!("SUB {subject} {sid}\r\n").as_bytes())
            .await?;
    }

    *inner.writer.lock().await = Some(write_half);
    inner.connected.store(true, Ordering::Relaxed);
    Ok(reader)
}

/// Owns the read side: dispatch until the connection drops, then
/// reconnect forever (or until the bus handle is dropped).
async fn supervise(inner: Weak<NatsInner>, mut reader: BufReader<OwnedReadHalf>) {
    loop {
        if let Err(err) = read_loop(&inner, &mut reader).await {
            let Some(strong) = inner.upgrade() else {
                return;
            };
            strong.connected.store(false, Ordering::Relaxed);
            *strong.writer.lock().await = None;
            warn!(error = %err, "bus connection lost, reconnecting");
        } else {
            // Handle dropped; nothing left to serve.
            return;
        }

        loop {
            tokio::time::sleep(RECONNECT_DELAY).await;
            let Some(strong) = inner.upgrade() else {
                return;
            };
            match establish(&strong.addresses).await {
                Ok(stream) => match attach(&strong, stream).await {
                    Ok(fresh) => {
                        debug!("bus reconnected");
                        reader = fresh;
                        break;
                    }
                    Err(err) => debug!(error = %err, "bus handshake failed"),
                },
                Err(err) => debug!(error = %err, "bus reconnect failed"),
            }
        }
    }
}

/// Returns `Ok(())` when the owning handle disappeared, `Err` when the
/// connection failed.
async fn read_loop(
    inner: &Weak<NatsInner>,
    reader: &mut BufReader<OwnedReadHalf>,
) -> Result<(), BusError> {
    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            return Err(BusError::Disconnected);
        }
        let line = line.trim_end();

        let Some(strong) = inner.upgrade() else {
            return Ok(());
        };

        if line.starts_with("MSG ") {
            let (sid, message) = parse_msg(line, reader).await?;
            dispatch(&strong, sid, message);
        } else if line == "PING" {
            send_frame(&strong, b"PONG\r\n".to_vec()).await.ok();
        } else if line.starts_with("-ERR") {
            warn!(error = line, "bus server error");
        }
        // INFO, PONG and +OK need no action.
    }
}

/// Parse a `MSG <subject> <sid> [reply] <len>` header and read its
/// payload.
async fn parse_msg(
    header: &str,
    reader: &mut BufReader<OwnedReadHalf>,
) -> Result<(u64, BusMessage), BusError> {
    let parts: Vec<&str> = header.split_whitespace().collect();
    let (subject, sid, reply, len) = match parts.as_slice() {
        ["MSG", subject, sid, len] => (*subject, *sid, None, *len),
        ["MSG", subject, sid, reply, len] => (*subject, *sid, Some(reply.to_string()), *len),
        _ => {
            return Err(BusError::Protocol(format!("malformed MSG header: {header}")));
        }
    };
    let sid: u64 = sid
        .parse()
        .map_err(|_| BusError::Protocol(format!("malformed sid in: {header}")))?;
    let len: usize = len
        .parse()
        .map_err(|_| BusError::Protocol(format!("malformed length in: {header}")))?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf).await?;

    Ok((
        sid,
        BusMessage {
            subject: subject.to_string(),
            reply,
            payload: Bytes::from(payload),
        },
    ))
}

fn dispatch(inner: &NatsInner, sid: u64, message: BusMessage) {
    let mut subscriptions = inner.subscriptions.lock().expect("subscriptions lock");
    let delivered = match subscriptions.get(&sid) {
        Some(entry) => entry.tx.try_send(message).is_ok(),
        None => {
            debug!(sid, "message for unknown subscription");
            return;
        }
    };
    if !delivered {
        subscriptions.remove(&sid);
    }
}
