//! In-memory transport pair.
//!
//! Two cross-wired halves: what one half sends, the other receives. The
//! Virtual MCP bridge serves an aggregator over one half and hands the
//! other to an ordinary client; tests script downstream servers the same
//! way.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::core::{Transport, TransportError, TransportKind, TransportMessage, TransportResult};

/// One half of an in-memory transport pair
#[derive(Debug)]
pub struct MemoryTransport {
    label: &'static str,
    outbound: Option<mpsc::UnboundedSender<TransportMessage>>,
    inbound: Option<mpsc::UnboundedReceiver<TransportMessage>>,
    closed: bool,
}

impl MemoryTransport {
    /// Create a cross-wired pair of transports
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self {
                label: "client",
                outbound: Some(a_tx),
                inbound: Some(a_rx),
                closed: false,
            },
            Self {
                label: "server",
                outbound: Some(b_tx),
                inbound: Some(b_rx),
                closed: false,
            },
        )
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Memory
    }

    async fn start(&mut self) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        Ok(())
    }

    async fn send(&mut self, message: TransportMessage) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let Some(ref sender) = self.outbound else {
            return Err(TransportError::Closed);
        };
        sender
            .send(message)
            .map_err(|_| TransportError::ConnectionLost("peer closed".to_string()))
    }

    async fn receive(&mut self) -> TransportResult<Option<TransportMessage>> {
        let Some(ref mut receiver) = self.inbound else {
            return Ok(None);
        };
        match receiver.recv().await {
            Some(message) => Ok(Some(message)),
            None => {
                self.inbound = None;
                Ok(None)
            }
        }
    }

    async fn close(&mut self) -> TransportResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.outbound = None;
        self.inbound = None;
        Ok(())
    }

    fn endpoint(&self) -> Option<String> {
        Some(format!("memory://{}", self.label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn message(text: &'static str) -> TransportMessage {
        TransportMessage::new(Bytes::from_static(text.as_bytes()))
    }

    #[tokio::test]
    async fn test_pair_round_trip() {
        let (mut client, mut server) = MemoryTransport::pair();
        client.start().await.unwrap();
        server.start().await.unwrap();

        client
            .send(message(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#))
            .await
            .unwrap();
        let received = server.receive().await.unwrap().unwrap();
        assert_eq!(received.parse().unwrap().method(), Some("ping"));

        server
            .send(message(r#"{"jsonrpc":"2.0","result":{},"id":1}"#))
            .await
            .unwrap();
        let response = client.receive().await.unwrap().unwrap();
        assert!(response.parse().is_ok());
    }

    #[tokio::test]
    async fn test_peer_close_terminates_receive() {
        let (mut client, mut server) = MemoryTransport::pair();
        client.close().await.unwrap();
        assert!(server.receive().await.unwrap().is_none());
        assert!(server.receive().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_send_to_closed_peer_fails() {
        let (mut client, mut server) = MemoryTransport::pair();
        server.close().await.unwrap();
        let result = client.send(message("{}")).await;
        assert!(matches!(result, Err(TransportError::ConnectionLost(_))));
    }
}
