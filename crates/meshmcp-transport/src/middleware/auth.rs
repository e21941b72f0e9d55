//! Auth middleware: refreshes the header snapshot before each request.
//!
//! The header map is shared by reference with the transport's request
//! config; publishing a new snapshot here makes the very next send observe
//! fresh headers without reconstructing the transport, which is what keeps
//! the client pool intact across token refreshes.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::core::{Transport, TransportKind, TransportMessage, TransportResult};
use crate::headers::{HeaderSnapshot, SharedHeaders};

use meshmcp_protocol::JsonRpcMessage;

/// Produces the current header set for one connection.
///
/// Implementations assemble the request id, caller id, forwardable headers,
/// the downstream bearer (refreshing it when stale) and the mesh JWT.
#[async_trait]
pub trait HeaderSource: Send + Sync + fmt::Debug {
    /// Build the header snapshot for the next outgoing request
    async fn build_headers(&self) -> TransportResult<HeaderSnapshot>;
}

/// Transport wrapper that rewrites headers on each outgoing request
#[derive(Debug)]
pub struct AuthTransport {
    inner: Box<dyn Transport>,
    source: Arc<dyn HeaderSource>,
    headers: SharedHeaders,
}

impl AuthTransport {
    /// Wrap `inner`, publishing snapshots from `source` into `headers`
    pub fn new(
        inner: Box<dyn Transport>,
        source: Arc<dyn HeaderSource>,
        headers: SharedHeaders,
    ) -> Self {
        Self {
            inner,
            source,
            headers,
        }
    }
}

#[async_trait]
impl Transport for AuthTransport {
    fn kind(&self) -> TransportKind {
        self.inner.kind()
    }

    async fn start(&mut self) -> TransportResult<()> {
        // Seed headers so the connect handshake already carries auth.
        match self.source.build_headers().await {
            Ok(snapshot) => self.headers.store(snapshot),
            Err(e) => warn!("Header build failed before start: {e}"),
        }
        self.inner.start().await
    }

    async fn send(&mut self, message: TransportMessage) -> TransportResult<()> {
        let is_request = matches!(message.parse(), Ok(JsonRpcMessage::Request(_)));
        if is_request {
            match self.source.build_headers().await {
                Ok(snapshot) => self.headers.store(snapshot),
                Err(e) => {
                    // Keep the previous snapshot; a stale bearer beats a
                    // dropped request and the downstream will 401 if not.
                    warn!("Header build failed, sending with previous headers: {e}");
                }
            }
        }
        self.inner.send(message).await
    }

    async fn receive(&mut self) -> TransportResult<Option<TransportMessage>> {
        self.inner.receive().await
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.inner.close().await
    }

    fn endpoint(&self) -> Option<String> {
        self.inner.endpoint()
    }

    fn supports_streaming(&self) -> bool {
        self.inner.supports_streaming()
    }
}
