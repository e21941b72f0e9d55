//! Server-Sent Events transport and the event-stream parser shared with the
//! HTTP streamable transport.
//!
//! The SSE transport opens one persistent GET whose `message` events carry
//! inbound JSON-RPC; outbound requests POST to the endpoint the stream
//! announces in its initial `endpoint` event. Headers are read from the
//! shared snapshot on every request, so token refreshes take effect without
//! reconnecting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::{Transport, TransportError, TransportKind, TransportMessage, TransportResult};
use crate::headers::SharedHeaders;

/// One parsed server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// Event name; `message` when the stream did not set one
    pub event: String,
    /// Concatenated data lines
    pub data: String,
}

/// Incremental parser for `text/event-stream` bodies.
///
/// Feed arbitrary chunks; complete events come out. CR/LF and LF line
/// endings are accepted; comment lines and unknown fields are skipped.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event: Option<String>,
    data: Vec<String>,
}

impl SseParser {
    /// Create an empty parser
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a chunk, returning every event completed by it
    pub fn push(&mut self, chunk: &str) -> Vec<SseEvent> {
        self.buffer.push_str(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    events.push(SseEvent {
                        event: self.event.take().unwrap_or_else(|| "message".to_string()),
                        data: self.data.join("\n"),
                    });
                    self.data.clear();
                }
                self.event = None;
                continue;
            }
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                _ => {}
            }
        }
        events
    }
}

/// Configuration for the SSE transport
#[derive(Debug, Clone)]
pub struct SseConfig {
    /// Stream URL opened with a persistent GET
    pub url: String,
    /// Shared header snapshot read on every request
    pub headers: SharedHeaders,
    /// How long `send` waits for the endpoint announcement
    pub endpoint_timeout: Duration,
}

impl SseConfig {
    /// Config with the default endpoint timeout
    pub fn new(url: impl Into<String>, headers: SharedHeaders) -> Self {
        Self {
            url: url.into(),
            headers,
            endpoint_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Default)]
struct EndpointSlot {
    url: parking_lot::Mutex<Option<String>>,
    ready: Notify,
}

/// SSE transport
#[derive(Debug)]
pub struct SseTransport {
    config: SseConfig,
    client: reqwest::Client,
    endpoint: Arc<EndpointSlot>,
    inbound_tx: Option<mpsc::Sender<TransportMessage>>,
    inbound_rx: Option<mpsc::Receiver<TransportMessage>>,
    cancel: CancellationToken,
    closed: bool,
}

impl SseTransport {
    /// Create an SSE transport; the stream opens on [`start`](Transport::start)
    pub fn new(config: SseConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        Self {
            config,
            client: reqwest::Client::new(),
            endpoint: Arc::new(EndpointSlot::default()),
            inbound_tx: Some(inbound_tx),
            inbound_rx: Some(inbound_rx),
            cancel: CancellationToken::new(),
            closed: false,
        }
    }

    fn apply_headers(&self, mut request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let snapshot = self.config.headers.load();
        for (name, value) in snapshot.iter() {
            request = request.header(name, value);
        }
        request
    }

    async fn wait_for_endpoint(&self) -> TransportResult<String> {
        let deadline = tokio::time::sleep(self.config.endpoint_timeout);
        tokio::pin!(deadline);
        loop {
            if let Some(url) = self.endpoint.url.lock().clone() {
                return Ok(url);
            }
            tokio::select! {
                () = self.endpoint.ready.notified() => {}
                () = &mut deadline => return Err(TransportError::Timeout),
            }
        }
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Sse
    }

    async fn start(&mut self) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let request = self
            .apply_headers(self.client.get(&self.config.url))
            .header("accept", "text/event-stream");
        let response = request
            .send()
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::ConnectionFailed(format!(
                "stream request returned {}",
                response.status()
            )));
        }

        let inbound = self
            .inbound_tx
            .clone()
            .ok_or(TransportError::Closed)?;
        let endpoint = self.endpoint.clone();
        let base_url = self.config.url.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut parser = SseParser::new();
            loop {
                let chunk = tokio::select! {
                    chunk = stream.next() => chunk,
                    () = cancel.cancelled() => break,
                };
                let Some(chunk) = chunk else { break };
                let Ok(chunk) = chunk else {
                    warn!("SSE stream error, closing");
                    break;
                };
                let text = String::from_utf8_lossy(&chunk);
                for event in parser.push(&text) {
                    match event.event.as_str() {
                        "endpoint" => {
                            let url = resolve_endpoint(&base_url, &event.data);
                            debug!(endpoint = %url, "SSE endpoint announced");
                            *endpoint.url.lock() = Some(url);
                            endpoint.ready.notify_waiters();
                        }
                        "message" => {
                            let message = TransportMessage::new(Bytes::from(event.data));
                            if inbound.send(message).await.is_err() {
                                return;
                            }
                        }
                        other => debug!(event = other, "Ignoring SSE event"),
                    }
                }
            }
            debug!("SSE reader task completed");
        });

        Ok(())
    }

    async fn send(&mut self, message: TransportMessage) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let endpoint = self.wait_for_endpoint().await?;
        let response = self
            .apply_headers(self.client.post(&endpoint))
            .header("content-type", "application/json")
            .body(message.payload)
            .send()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(TransportError::SendFailed(format!(
                "endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn receive(&mut self) -> TransportResult<Option<TransportMessage>> {
        let Some(ref mut receiver) = self.inbound_rx else {
            return Ok(None);
        };
        match receiver.recv().await {
            Some(message) => Ok(Some(message)),
            None => {
                self.inbound_rx = None;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> TransportResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.cancel.cancel();
        self.inbound_tx = None;
        Ok(())
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.config.url.clone())
    }
}

/// Resolve an `endpoint` event payload against the stream URL.
fn resolve_endpoint(base: &str, announced: &str) -> String {
    match url::Url::parse(base).and_then(|b| b.join(announced)) {
        Ok(url) => url.to_string(),
        Err(_) => announced.to_string(),
    }
}
