//! Assemble a gateway over in-memory storage, register a Virtual MCP and
//! talk to it through the bridge.
//!
//! Run with: `cargo run --example virtual_mesh -p meshmcp-gateway`

use serde_json::json;

use meshmcp_client::{ClientPool, McpService};
use meshmcp_core::context::RequestContext;
use meshmcp_core::model::{ToolSelectionMode, ToolSurfaceMode, VirtualMcp};
use meshmcp_core::storage::Storage;
use meshmcp_core::MeshConfig;
use meshmcp_gateway::MeshGateway;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let (storage, memory) = Storage::in_memory();
    memory.put_virtual_mcp(VirtualMcp {
        id: "vmcp_demo".to_string(),
        organization_id: "org-demo".to_string(),
        title: "Demo Bundle".to_string(),
        metadata: json!({"instructions": "Search before calling."})
            .as_object()
            .cloned(),
        connections: vec![],
        tool_selection_mode: ToolSelectionMode::Inclusion,
        tool_surface_mode: ToolSurfaceMode::SmartSelection,
    });

    let gateway = MeshGateway::new(storage, MeshConfig::from_env());
    let ctx = RequestContext::new().with_organization("org-demo");
    let pool = ClientPool::new();

    let client = gateway
        .open_virtual("vmcp_demo", Some("org-demo"), &ctx, &pool)
        .await?;

    let info = client.server_info().expect("handshake completed");
    println!("connected to {} v{}", info.name, info.version);
    if let Some(instructions) = client.instructions() {
        println!("instructions: {instructions}");
    }

    for tool in client.list_tools().await? {
        println!("tool: {} - {}", tool.name, tool.description.unwrap_or_default());
    }

    let result = client
        .call_tool(
            "GATEWAY_SEARCH_TOOLS",
            json!({"query": "anything"}).as_object().cloned(),
        )
        .await?;
    println!(
        "search payload: {}",
        result.content[0].as_text().unwrap_or_default()
    );

    client.close().await?;
    pool.dispose().await;
    Ok(())
}
