//! HTTP orchestrator client.
//!
//! Lists are plain JSON arrays; the event feed is a long-lived
//! response streaming one JSON-encoded change event per line. Built on
//! raw hyper 1.x client connections with a background connection
//! driver.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use routeplane_core::{ActualRecord, ChangeEvent, DesiredRecord};

use crate::{EventSource, OrchestratorClient, OrchestratorError};

const DESIRED_PATH: &str = "/v1/desired";
const ACTUAL_PATH: &str = "/v1/actual";
const EVENTS_PATH: &str = "/v1/events";

pub struct HttpOrchestratorClient {
    authority: String,
    timeout: Duration,
}

impl HttpOrchestratorClient {
    /// `base_url` is the orchestrator's `http://host:port` endpoint;
    /// `timeout` bounds every list call and the stream connection.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, OrchestratorError> {
        let uri: http::Uri = base_url
            .parse()
            .map_err(|_| OrchestratorError::Protocol(format!("invalid orchestrator url: {base_url}")))?;
        let authority = uri
            .authority()
            .ok_or_else(|| {
                OrchestratorError::Protocol(format!("orchestrator url has no authority: {base_url}"))
            })?
            .to_string();
        Ok(Self { authority, timeout })
    }

    async fn get(&self, path: &str) -> Result<Bytes, OrchestratorError> {
        let response = tokio::time::timeout(self.timeout, request(&self.authority, path))
            .await
            .map_err(|_| OrchestratorError::Timeout)??;

        let (parts, body) = response.into_parts();
        if !parts.status.is_success() {
            return Err(OrchestratorError::Protocol(format!(
                "unexpected status {} for {path}",
                parts.status
            )));
        }

        let collected = tokio::time::timeout(self.timeout, body.collect())
            .await
            .map_err(|_| OrchestratorError::Timeout)?
            .map_err(|err| OrchestratorError::Unavailable(err.to_string()))?;
        Ok(collected.to_bytes())
    }
}

async fn request(
    authority: &str,
    path: &str,
) -> Result<http::Response<hyper::body::Incoming>, OrchestratorError> {
    let stream = TcpStream::connect(authority)
        .await
        .map_err(|err| OrchestratorError::Unavailable(err.to_string()))?;

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake::<_, Empty<Bytes>>(io)
        .await
        .map_err(|err| OrchestratorError::Unavailable(err.to_string()))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let request = http::Request::builder()
        .method("GET")
        .uri(path)
        .header("host", authority)
        .header("user-agent", "routeplane/0.1")
        .body(Empty::new())
        .map_err(|err| OrchestratorError::Protocol(err.to_string()))?;

    sender
        .send_request(request)
        .await
        .map_err(|err| OrchestratorError::Unavailable(err.to_string()))
}

#[async_trait]
impl OrchestratorClient for HttpOrchestratorClient {
    async fn list_desired(&self) -> Result<Vec<DesiredRecord>, OrchestratorError> {
        let body = self.get(DESIRED_PATH).await?;
        serde_json::from_slice(&body).map_err(|err| OrchestratorError::Protocol(err.to_string()))
    }

    async fn list_actual(&self) -> Result<Vec<ActualRecord>, OrchestratorError> {
        let body = self.get(ACTUAL_PATH).await?;
        serde_json::from_slice(&body).map_err(|err| OrchestratorError::Protocol(err.to_string()))
    }

    async fn subscribe_events(&self) -> Result<Box<dyn EventSource>, OrchestratorError> {
        let response = tokio::time::timeout(self.timeout, request(&self.authority, EVENTS_PATH))
            .await
            .map_err(|_| OrchestratorError::Timeout)??;

        if !response.status().is_success() {
            return Err(OrchestratorError::Protocol(format!(
                "unexpected status {} for {EVENTS_PATH}",
                response.status()
            )));
        }

        debug!(authority = %self.authority, "event stream opened");
        Ok(Box::new(HttpEventSource {
            body: response.into_body(),
            buffer: Vec::new(),
        }))
    }
}

/// Reads the NDJSON event feed. Lines that fail to parse, including
/// events of kinds this emitter does not recognize, are logged and
/// skipped.
struct HttpEventSource {
    body: hyper::body::Incoming,
    buffer: Vec<u8>,
}

impl HttpEventSource {
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let newline = self.buffer.iter().position(|byte| *byte == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }
}

#[async_trait]
impl EventSource for HttpEventSource {
    async fn next_event(&mut self) -> Result<ChangeEvent, OrchestratorError> {
        loop {
            while let Some(line) = self.take_line() {
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_slice::<ChangeEvent>(&line) {
                    Ok(event) => return Ok(event),
                    Err(err) => {
                        warn!(error = %err, "skipping unrecognized event");
                    }
                }
            }

            match self.body.frame().await {
                Some(Ok(frame)) => {
                    if let Ok(data) = frame.into_data() {
                        self.buffer.extend_from_slice(&data);
                    }
                }
                Some(Err(err)) => return Err(OrchestratorError::Unavailable(err.to_string())),
                None => return Err(OrchestratorError::StreamClosed),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one request with the given body, then close.
    async fn one_shot_server(body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = stream.read(&mut request).await;

            let response = format!(
                "HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: {}\r\n\r\n{}",
                body.len(),
                body
            );
            stream.write_all(response.as_bytes()).await.unwrap();
        });

        address
    }

    fn client(address: &str) -> HttpOrchestratorClient {
        HttpOrchestratorClient::new(&format!("http://{address}"), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn lists_desired_records() {
        let body = serde_json::json!([{
            "process_id": "process-1",
            "ports": [8080],
            "log_id": "log-1"
        }])
        .to_string();
        let address = one_shot_server(body).await;

        let records = client(&address).list_desired().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].process_id, "process-1");
        assert_eq!(records[0].ports, vec![8080]);
    }

    #[tokio::test]
    async fn surfaces_malformed_payloads() {
        let address = one_shot_server("not json".to_string()).await;
        let err = client(&address).list_actual().await;
        assert!(matches!(err, Err(OrchestratorError::Protocol(_))));
    }

    #[tokio::test]
    async fn unreachable_store_is_unavailable() {
        let client =
            HttpOrchestratorClient::new("http://127.0.0.1:1", Duration::from_millis(500)).unwrap();
        let err = client.list_desired().await;
        assert!(matches!(err, Err(OrchestratorError::Unavailable(_))));
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // Hold the connection open without answering.
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(stream);
        });

        let client =
            HttpOrchestratorClient::new(&format!("http://{address}"), Duration::from_millis(200))
                .unwrap();
        let err = client.list_desired().await;
        assert!(matches!(err, Err(OrchestratorError::Timeout)));
    }

    #[tokio::test]
    async fn event_stream_parses_lines_and_skips_garbage() {
        let event = serde_json::json!({
            "type": "desired_removed",
            "record": {
                "process_id": "process-1",
                "ports": [8080],
                "log_id": "log-1"
            }
        });
        let body = format!("{event}\nnot json\n{{\"type\":\"volume_created\"}}\n{event}\n");
        let address = one_shot_server(body).await;

        let mut source = client(&address).subscribe_events().await.unwrap();

        for _ in 0..2 {
            let parsed = source.next_event().await.unwrap();
            assert!(matches!(parsed, ChangeEvent::DesiredRemoved { .. }));
        }
        assert!(matches!(
            source.next_event().await,
            Err(OrchestratorError::StreamClosed)
        ));
    }

    #[test]
    fn rejects_urls_without_authority() {
        assert!(HttpOrchestratorClient::new("not a url", Duration::from_secs(1)).is_err());
    }
}
