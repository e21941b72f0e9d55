//! Core transport trait and types.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use thiserror::Error;

use meshmcp_protocol::JsonRpcMessage;

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Errors that can occur in transport operations
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection lost
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Send operation failed
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Receive operation failed
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Transport is closed
    #[error("Transport closed")]
    Closed,

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Stdio transports are refused in production without the unsafe override
    #[error("stdio transport is disallowed in production (set UNSAFE_ALLOW_STDIO_TRANSPORT=true to override)")]
    StdioDisallowed,

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationFailed(err.to_string())
    }
}

/// Concrete transport kinds supported by the mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Child process over stdio
    Stdio,
    /// HTTP streamable
    Http,
    /// Server-Sent Events
    Sse,
    /// WebSocket
    WebSocket,
    /// In-memory pair
    Memory,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stdio => write!(f, "stdio"),
            Self::Http => write!(f, "http"),
            Self::Sse => write!(f, "sse"),
            Self::WebSocket => write!(f, "websocket"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

/// One JSON-RPC message on the wire.
#[derive(Debug, Clone)]
pub struct TransportMessage {
    /// Serialized JSON-RPC payload
    pub payload: Bytes,
}

impl TransportMessage {
    /// Wrap an already serialized payload
    pub fn new(payload: Bytes) -> Self {
        Self { payload }
    }

    /// Serialize a JSON-RPC value into a message
    pub fn from_json<T: Serialize>(value: &T) -> TransportResult<Self> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self::new(payload.into()))
    }

    /// Parse the payload as a JSON-RPC message
    pub fn parse(&self) -> TransportResult<JsonRpcMessage> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// Message size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}

/// Bidirectional channel for JSON-RPC messages.
///
/// Contract:
/// - [`start`](Transport::start) suspends until the channel is ready (child
///   process spawned, stream opened). Idempotent once started.
/// - [`send`](Transport::send) enqueues one outgoing message; fails with
///   [`TransportError::Closed`] once the transport is closed.
/// - [`receive`](Transport::receive) awaits the next inbound message.
///   `Ok(None)` is the terminal close event; after it, every further call
///   returns `Ok(None)` immediately.
/// - [`close`](Transport::close) releases all resources; idempotent.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Concrete kind of this transport
    fn kind(&self) -> TransportKind;

    /// Begin receiving; resolves when the channel is ready
    async fn start(&mut self) -> TransportResult<()>;

    /// Enqueue one outgoing message
    async fn send(&mut self, message: TransportMessage) -> TransportResult<()>;

    /// Await the next inbound message; `Ok(None)` signals close
    async fn receive(&mut self) -> TransportResult<Option<TransportMessage>>;

    /// Release all resources
    async fn close(&mut self) -> TransportResult<()>;

    /// Endpoint information for diagnostics
    fn endpoint(&self) -> Option<String> {
        None
    }

    /// Whether responses can arrive as a stream of chunks
    fn supports_streaming(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshmcp_core::MessageId;
    use meshmcp_protocol::JsonRpcRequest;

    #[test]
    fn test_kind_display() {
        assert_eq!(TransportKind::Stdio.to_string(), "stdio");
        assert_eq!(TransportKind::Http.to_string(), "http");
        assert_eq!(TransportKind::Sse.to_string(), "sse");
        assert_eq!(TransportKind::WebSocket.to_string(), "websocket");
    }

    #[test]
    fn test_message_round_trip() {
        let request = JsonRpcRequest::new("tools/list", None, MessageId::from(1));
        let message = TransportMessage::from_json(&request).unwrap();
        assert!(message.size() > 0);

        let parsed = message.parse().unwrap();
        assert_eq!(parsed.method(), Some("tools/list"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let message = TransportMessage::new(Bytes::from_static(b"not json"));
        assert!(matches!(
            message.parse(),
            Err(TransportError::SerializationFailed(_))
        ));
    }
}
