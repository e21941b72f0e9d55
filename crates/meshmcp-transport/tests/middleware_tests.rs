//! Composed middleware behavior over an in-memory wire.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use meshmcp_core::context::RequestContext;
use meshmcp_core::storage::InMemoryStorage;
use meshmcp_core::MessageId;
use meshmcp_protocol::{JsonRpcRequest, JsonRpcResponse, methods};
use meshmcp_transport::headers::{AUTHORIZATION, HeaderRegistry, HeaderSnapshot, X_MESH_TOKEN};
use meshmcp_transport::middleware::{
    AuthTransport, HeaderSource, MonitoringContext, MonitoringTransport,
};
use meshmcp_transport::{
    MemoryTransport, SharedHeaders, Transport, TransportMessage, TransportResult,
};

#[derive(Debug)]
struct StaticSource {
    bearer: String,
}

#[async_trait]
impl HeaderSource for StaticSource {
    async fn build_headers(&self) -> TransportResult<HeaderSnapshot> {
        Ok(HeaderSnapshot::new()
            .with(AUTHORIZATION, format!("Bearer {}", self.bearer))
            .with(X_MESH_TOKEN, "mesh-jwt"))
    }
}

/// Full stack: Auth wraps Monitoring wraps the raw transport; requests flow
/// outer to inner, responses inner to outer.
fn stack(
    sink: Arc<InMemoryStorage>,
) -> (AuthTransport, MemoryTransport, SharedHeaders) {
    let (client_half, server_half) = MemoryTransport::pair();
    let ctx = RequestContext::new().with_organization("org-1");
    let monitoring = MonitoringTransport::new(
        Box::new(client_half),
        MonitoringContext::new("conn_a", "A", &ctx, true),
        Some(sink),
    );
    let headers = SharedHeaders::default();
    let auth = AuthTransport::new(
        Box::new(monitoring),
        Arc::new(StaticSource {
            bearer: "tkn".to_string(),
        }),
        headers.clone(),
    );
    (auth, server_half, headers)
}

fn call_request(id: i64) -> TransportMessage {
    let request = JsonRpcRequest::new(
        methods::TOOLS_CALL,
        Some(json!({"name": "echo", "arguments": {}})),
        MessageId::from(id),
    );
    TransportMessage::from_json(&request).unwrap()
}

#[tokio::test]
async fn test_chained_middleware_records_and_publishes_headers() {
    let sink = Arc::new(InMemoryStorage::new());
    let (mut transport, mut server, headers) = stack(sink.clone());

    transport.send(call_request(1)).await.unwrap();
    // Auth ran before the inner send: the snapshot is already published.
    assert_eq!(headers.load().get(AUTHORIZATION), Some("Bearer tkn"));
    assert_eq!(headers.load().get(X_MESH_TOKEN), Some("mesh-jwt"));

    // The request reached the wire unchanged.
    let on_wire = server.receive().await.unwrap().unwrap();
    assert_eq!(on_wire.parse().unwrap().method(), Some(methods::TOOLS_CALL));

    // Answer it; monitoring observes the response on its way out.
    let response = JsonRpcResponse::success(
        json!({"content": [{"type": "text", "text": "done"}]}),
        MessageId::from(1),
    );
    server
        .send(TransportMessage::from_json(&response).unwrap())
        .await
        .unwrap();
    let received = transport.receive().await.unwrap();
    assert!(received.is_some());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tool_name, "echo");
    assert_eq!(records[0].organization_id, "org-1");
}

#[tokio::test]
async fn test_close_propagates_through_the_stack() {
    let sink = Arc::new(InMemoryStorage::new());
    let (mut transport, mut server, _headers) = stack(sink.clone());

    transport.send(call_request(2)).await.unwrap();
    server.receive().await.unwrap();

    transport.close().await.unwrap();
    // The raw transport closed: the server half sees the terminal event and
    // the in-flight call produced no record.
    assert!(server.receive().await.unwrap().is_none());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(sink.records().is_empty());
}

#[tokio::test]
async fn test_registry_slot_shared_with_stack() {
    let registry = HeaderRegistry::new();
    let handle = registry.handle("conn_shared");

    let (client_half, _server_half) = MemoryTransport::pair();
    let mut auth = AuthTransport::new(
        Box::new(client_half),
        Arc::new(StaticSource {
            bearer: "fresh".to_string(),
        }),
        handle.clone(),
    );
    auth.send(call_request(3)).await.unwrap();

    // Any other holder of the registry slot observes the published headers
    // without touching the transport.
    let observer = registry.handle("conn_shared");
    assert_eq!(observer.load().get(AUTHORIZATION), Some("Bearer fresh"));
}
