//! HTTP streamable transport.
//!
//! Every outgoing JSON-RPC message is POSTed to the endpoint with the
//! current shared-header snapshot. The server answers each request either
//! with a single JSON body or with a `text/event-stream` body whose
//! `message` events are forwarded to the receive side as they arrive.
//! A `Mcp-Session-Id` announced by the server is echoed on later requests.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::{Transport, TransportError, TransportKind, TransportMessage, TransportResult};
use crate::headers::SharedHeaders;
use crate::sse::SseParser;

const SESSION_HEADER: &str = "mcp-session-id";

/// Configuration for the HTTP streamable transport
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Endpoint URL
    pub url: String,
    /// Shared header snapshot read on every request
    pub headers: SharedHeaders,
}

impl HttpConfig {
    /// Create a config
    pub fn new(url: impl Into<String>, headers: SharedHeaders) -> Self {
        Self {
            url: url.into(),
            headers,
        }
    }
}

/// HTTP streamable transport
#[derive(Debug)]
pub struct HttpTransport {
    config: HttpConfig,
    client: reqwest::Client,
    session_id: Arc<Mutex<Option<String>>>,
    inbound_tx: Option<mpsc::Sender<TransportMessage>>,
    inbound_rx: Option<mpsc::Receiver<TransportMessage>>,
    cancel: CancellationToken,
    closed: bool,
}

impl HttpTransport {
    /// Create an HTTP transport
    pub fn new(config: HttpConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        Self {
            config,
            client: reqwest::Client::new(),
            session_id: Arc::new(Mutex::new(None)),
            inbound_tx: Some(inbound_tx),
            inbound_rx: Some(inbound_rx),
            cancel: CancellationToken::new(),
            closed: false,
        }
    }

    fn build_request(&self, payload: Bytes) -> reqwest::RequestBuilder {
        let mut request = self
            .client
            .post(&self.config.url)
            .header("content-type", "application/json")
            .header("accept", "application/json, text/event-stream")
            .body(payload);
        let snapshot = self.config.headers.load();
        for (name, value) in snapshot.iter() {
            request = request.header(name, value);
        }
        if let Some(session) = self.session_id.lock().clone() {
            request = request.header(SESSION_HEADER, session);
        }
        request
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    async fn start(&mut self) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        // Requests open their own streams; nothing to set up eagerly.
        Ok(())
    }

    async fn send(&mut self, message: TransportMessage) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let inbound = self.inbound_tx.clone().ok_or(TransportError::Closed)?;
        let request = self.build_request(message.payload);
        let session_id = self.session_id.clone();
        let cancel = self.cancel.clone();

        let response = request
            .send()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        if let Some(session) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *session_id.lock() = Some(session.to_string());
        }

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::SendFailed(format!(
                "endpoint returned {status}"
            )));
        }

        let is_stream = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/event-stream"))
            .unwrap_or(false);

        // Responses are pumped into the inbound channel off the send path so
        // slow streams never block subsequent sends.
        tokio::spawn(async move {
            if is_stream {
                let mut stream = response.bytes_stream();
                let mut parser = SseParser::new();
                loop {
                    let chunk = tokio::select! {
                        chunk = stream.next() => chunk,
                        () = cancel.cancelled() => break,
                    };
                    let Some(chunk) = chunk else { break };
                    let Ok(chunk) = chunk else {
                        warn!("Response stream error");
                        break;
                    };
                    for event in parser.push(&String::from_utf8_lossy(&chunk)) {
                        if event.event == "message"
                            && inbound
                                .send(TransportMessage::new(Bytes::from(event.data)))
                                .await
                                .is_err()
                        {
                            return;
                        }
                    }
                }
            } else {
                match response.bytes().await {
                    Ok(body) if !body.is_empty() => {
                        let _ = inbound.send(TransportMessage::new(body)).await;
                    }
                    Ok(_) => debug!("Empty response body (notification accepted)"),
                    Err(e) => warn!("Failed to read response body: {e}"),
                }
            }
        });

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

    fn supports_streaming(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let mut transport =
            HttpTransport::new(HttpConfig::new("https://unused.example/mcp", SharedHeaders::default()));
        transport.close().await.unwrap();
        let result = transport
            .send(TransportMessage::new(Bytes::from_static(b"{}")))
            .await;
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_receive_after_close_is_terminal() {
        let mut transport =
            HttpTransport::new(HttpConfig::new("https://unused.example/mcp", SharedHeaders::default()));
        transport.close().await.unwrap();
        assert!(transport.receive().await.unwrap().is_none());
        assert!(transport.receive().await.unwrap().is_none());
    }

    #[test]
    fn test_streaming_supported() {
        let transport =
            HttpTransport::new(HttpConfig::new("https://unused.example/mcp", SharedHeaders::default()));
        assert!(transport.supports_streaming());
        assert_eq!(transport.kind(), TransportKind::Http);
    }
}
