//! Serving an aggregated surface over the in-memory bridge wire.

mod common;

use std::sync::Arc;

use serde_json::json;

use common::{FakeService, connection, tool};
use meshmcp_client::{Client, ClientOptions, McpService};
use meshmcp_core::model::{ToolSelectionMode, ToolSurfaceMode};
use meshmcp_gateway::{Aggregator, AggregatorChild, decorate, serve};
use meshmcp_transport::MemoryTransport;

async fn serve_aggregated(mode: ToolSurfaceMode) -> (Client, Arc<FakeService>) {
    let service = FakeService::with_tools(vec![tool("t1", "first"), tool("t2", "second")]);
    let aggregator = Arc::new(Aggregator::new(
        vec![AggregatorChild {
            client: service.clone(),
            connection: connection("conn_a", "A"),
            selected_tools: None,
            selected_resources: None,
            selected_prompts: None,
        }],
        ToolSelectionMode::Exclusion,
        Some("Use t1 first.".to_string()),
    ));
    let surface = decorate(aggregator, mode);

    let (client_half, server_half) = MemoryTransport::pair();
    let _handle = serve(Box::new(server_half), surface, "bundle");
    let client = Client::connect(Box::new(client_half), ClientOptions::default())
        .await
        .expect("bridge client connects");
    (client, service)
}

#[tokio::test]
async fn test_handshake_carries_instructions_and_server_name() {
    let (client, _service) = serve_aggregated(ToolSurfaceMode::Passthrough).await;
    assert_eq!(client.server_info().unwrap().name, "bundle");
    assert_eq!(client.instructions().as_deref(), Some("Use t1 first."));
}

#[tokio::test]
async fn test_tools_flow_through_the_wire() {
    let (client, service) = serve_aggregated(ToolSurfaceMode::Passthrough).await;

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 2);

    let result = client
        .call_tool("t1", json!({"a": 1}).as_object().cloned())
        .await
        .unwrap();
    assert!(!result.failed());
    assert_eq!(result.content[0].as_text(), Some("handled t1"));

    let calls = service.recorded_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tool, "t1");
    assert_eq!(calls[0].arguments, json!({"a": 1}).as_object().cloned());
}

#[tokio::test]
async fn test_unknown_tool_error_is_content_not_fault() {
    let (client, _service) = serve_aggregated(ToolSurfaceMode::Passthrough).await;
    let result = client.call_tool("ghost", None).await.unwrap();
    assert!(result.failed());
    assert_eq!(result.content[0].as_text(), Some("Tool not found: ghost"));
}

#[tokio::test]
async fn test_unknown_resource_is_a_json_rpc_fault() {
    let (client, _service) = serve_aggregated(ToolSurfaceMode::Passthrough).await;
    let err = client.read_resource("file:///ghost").await.unwrap_err();
    assert_eq!(err.rpc_code, Some(-32002));
}

#[tokio::test]
async fn test_ping_answers() {
    let (client, _service) = serve_aggregated(ToolSurfaceMode::Passthrough).await;
    client.ping().await.unwrap();
}

#[tokio::test]
async fn test_smart_surface_over_the_wire() {
    let (client, _service) = serve_aggregated(ToolSurfaceMode::SmartSelection).await;

    let names: Vec<String> = client
        .list_tools()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert!(names.contains(&"GATEWAY_SEARCH_TOOLS".to_string()));
    assert!(!names.contains(&"t1".to_string()));

    let result = client
        .call_tool(
            "GATEWAY_CALL_TOOL",
            json!({"name": "t2", "arguments": {}}).as_object().cloned(),
        )
        .await
        .unwrap();
    assert!(!result.failed());
}

#[tokio::test]
async fn test_closing_client_tears_down_children() {
    let (client, service) = serve_aggregated(ToolSurfaceMode::Passthrough).await;
    client.close().await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(service.closed.load(std::sync::atomic::Ordering::SeqCst));
}
