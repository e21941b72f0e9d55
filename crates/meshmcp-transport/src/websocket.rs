//! WebSocket transport.
//!
//! The socket is opened once with the header snapshot current at start
//! time; JSON-RPC messages travel as text frames. A single pump task owns
//! the socket, multiplexing outbound sends and inbound frames.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, warn};

use crate::core::{Transport, TransportError, TransportKind, TransportMessage, TransportResult};
use crate::headers::SharedHeaders;

/// Configuration for the WebSocket transport
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Socket URL (`ws://` or `wss://`)
    pub url: String,
    /// Headers applied to the upgrade request
    pub headers: SharedHeaders,
}

impl WebSocketConfig {
    /// Create a config
    pub fn new(url: impl Into<String>, headers: SharedHeaders) -> Self {
        Self {
            url: url.into(),
            headers,
        }
    }
}

/// WebSocket transport
#[derive(Debug)]
pub struct WebSocketTransport {
    config: WebSocketConfig,
    outbound_tx: Option<mpsc::Sender<String>>,
    inbound_rx: Option<mpsc::Receiver<TransportMessage>>,
    closed: bool,
    _pump_task: Option<tokio::task::JoinHandle<()>>,
}

impl WebSocketTransport {
    /// Create a WebSocket transport; the socket opens on [`start`](Transport::start)
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            config,
            outbound_tx: None,
            inbound_rx: None,
            closed: false,
            _pump_task: None,
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn start(&mut self) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        if self.outbound_tx.is_some() {
            return Ok(());
        }

        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::ConfigurationError(e.to_string()))?;
        let snapshot = self.config.headers.load();
        for (name, value) in snapshot.iter() {
            let name: tokio_tungstenite::tungstenite::http::HeaderName = name
                .parse()
                .map_err(|_| TransportError::ConfigurationError(format!("bad header name: {name}")))?;
            let value = value
                .parse()
                .map_err(|_| TransportError::ConfigurationError("bad header value".to_string()))?;
            request.headers_mut().insert(name, value);
        }

        let (socket, _response) = connect_async(request)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (outbound_tx, mut outbound_rx) = mpsc::channel::<String>(64);
        let (inbound_tx, inbound_rx) = mpsc::channel::<TransportMessage>(64);

        let pump = tokio::spawn(async move {
            let (mut sink, mut stream) = socket.split();
            loop {
                tokio::select! {
                    outgoing = outbound_rx.recv() => {
                        let Some(text) = outgoing else {
                            let _ = sink.send(WsMessage::Close(None)).await;
                            break;
                        };
                        if let Err(e) = sink.send(WsMessage::Text(text)).await {
                            warn!("WebSocket send failed: {e}");
                            break;
                        }
                    }
                    incoming = stream.next() => {
                        match incoming {
                            Some(Ok(WsMessage::Text(text))) => {
                                let message = TransportMessage::new(Bytes::from(text));
                                if inbound_tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(WsMessage::Ping(payload))) => {
                                if sink.send(WsMessage::Pong(payload)).await.is_err() {
                                    break;
                                }
                            }
                            Some(Ok(WsMessage::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!("WebSocket receive failed: {e}");
                                break;
                            }
                        }
                    }
                }
            }
            debug!("WebSocket pump task completed");
        });

        self.outbound_tx = Some(outbound_tx);
        self.inbound_rx = Some(inbound_rx);
        self._pump_task = Some(pump);
        Ok(())
    }

    async fn send(&mut self, message: TransportMessage) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let text = String::from_utf8(message.payload.to_vec())
            .map_err(|e| TransportError::SerializationFailed(format!("non-UTF8 payload: {e}")))?;
        let Some(ref sender) = self.outbound_tx else {
            return Err(TransportError::Closed);
        };
        sender
            .send(text)
            .await
            .map_err(|_| TransportError::ConnectionLost("socket pump gone".to_string()))
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
        // Dropping the outbound sender makes the pump send a close frame.
        self.outbound_tx = None;
        Ok(())
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.config.url.clone())
    }
}
