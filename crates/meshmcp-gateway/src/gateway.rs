//! Gateway assembly.
//!
//! Wires storage, the outbound client factory and the Virtual MCP bridge
//! together. The factory needs the bridge to resolve `VIRTUAL` connections
//! and the bridge needs the factory to connect children, so the resolver is
//! installed through a slot filled once the bridge exists; nested Virtual
//! MCPs resolve through the same path.

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::OnceCell;

use meshmcp_client::{Client, ClientFactory, ClientPool, VirtualClientResolver};
use meshmcp_core::context::RequestContext;
use meshmcp_core::model::Connection;
use meshmcp_core::storage::Storage;
use meshmcp_core::{Error, MeshConfig, Result};

use crate::bridge::VirtualMcpBridge;

#[derive(Debug, Default)]
struct ResolverSlot {
    bridge: OnceCell<VirtualMcpBridge>,
}

#[async_trait]
impl VirtualClientResolver for ResolverSlot {
    async fn open(&self, connection: &Connection, ctx: &RequestContext) -> Result<Client> {
        let bridge = self
            .bridge
            .get()
            .ok_or_else(|| Error::internal("virtual MCP resolver not wired yet"))?;
        VirtualClientResolver::open(bridge, connection, ctx).await
    }
}

/// The assembled mesh gateway engine.
#[derive(Debug, Clone)]
pub struct MeshGateway {
    storage: Storage,
    factory: ClientFactory,
    bridge: VirtualMcpBridge,
}

impl MeshGateway {
    /// Assemble the engine over the platform's storage
    pub fn new(storage: Storage, config: MeshConfig) -> Self {
        let slot = Arc::new(ResolverSlot::default());
        let factory = ClientFactory::new(
            config,
            storage.downstream_tokens.clone(),
            storage.monitoring.clone(),
        )
        .with_virtual_resolver(slot.clone());
        let bridge = VirtualMcpBridge::new(storage.clone(), factory.clone());
        // Ignore the error: the slot is freshly created and unset.
        let _ = slot.bridge.set(bridge.clone());
        Self {
            storage,
            factory,
            bridge,
        }
    }

    /// The underlying storage bundle
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// The Virtual MCP bridge
    pub fn bridge(&self) -> &VirtualMcpBridge {
        &self.bridge
    }

    /// Open a Virtual MCP as a client.
    ///
    /// `request_pool` is the per-request pool for the HTTP-family children;
    /// stdio children share the process-wide pool regardless.
    pub async fn open_virtual(
        &self,
        vmcp_id: &str,
        organization_id: Option<&str>,
        ctx: &RequestContext,
        request_pool: &ClientPool,
    ) -> Result<Client> {
        self.bridge
            .open(vmcp_id, organization_id, ctx, request_pool)
            .await
    }

    /// Obtain a pooled client for a single connection by id.
    pub async fn client_for_connection(
        &self,
        connection_id: &str,
        ctx: &RequestContext,
        request_pool: &ClientPool,
    ) -> Result<Client> {
        let connection = self
            .storage
            .connections
            .find_by_id(connection_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Connection not found: {connection_id}")))?;
        self.factory.client_for(&connection, ctx, request_pool).await
    }

    /// Invalidate a connection after its record changed.
    ///
    /// Evicts any live stdio client, drops the published header slot, and
    /// returns the ids of the organization's Virtual MCPs that name the
    /// connection so the platform can rebuild them.
    pub async fn invalidate_connection(
        &self,
        organization_id: &str,
        connection_id: &str,
    ) -> Result<Vec<String>> {
        ClientPool::global_stdio().invalidate(connection_id);
        meshmcp_transport::HeaderRegistry::global().remove(connection_id);

        let affected = self
            .storage
            .virtual_mcps
            .list_by_connection_id(organization_id, connection_id)
            .await?;
        Ok(affected.into_iter().map(|vmcp| vmcp.id).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshmcp_client::McpService;
    use meshmcp_core::model::{ToolSelectionMode, ToolSurfaceMode, VirtualMcp};
    use serde_json::json;

    #[tokio::test]
    async fn test_open_virtual_end_to_end_with_no_children() {
        let (storage, memory) = Storage::in_memory();
        memory.put_virtual_mcp(VirtualMcp {
            id: "vmcp_empty".to_string(),
            organization_id: "org-1".to_string(),
            title: "Empty Bundle".to_string(),
            metadata: json!({"instructions": "Nothing here yet."})
                .as_object()
                .cloned(),
            connections: vec![],
            tool_selection_mode: ToolSelectionMode::Inclusion,
            tool_surface_mode: ToolSurfaceMode::Passthrough,
        });

        let gateway = MeshGateway::new(storage, MeshConfig::default());
        let ctx = RequestContext::new().with_organization("org-1");
        let pool = ClientPool::new();

        let client = gateway
            .open_virtual("vmcp_empty", Some("org-1"), &ctx, &pool)
            .await
            .unwrap();
        assert_eq!(client.server_info().unwrap().name, "Empty Bundle");
        assert_eq!(client.instructions().as_deref(), Some("Nothing here yet."));
        assert!(client.list_tools().await.unwrap().is_empty());
        client.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_client_for_unknown_connection_not_found() {
        let (storage, _memory) = Storage::in_memory();
        let gateway = MeshGateway::new(storage, MeshConfig::default());
        let ctx = RequestContext::new();
        let pool = ClientPool::new();
        let err = gateway
            .client_for_connection("conn_ghost", &ctx, &pool)
            .await
            .unwrap_err();
        assert_eq!(err.kind, meshmcp_core::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_invalidate_connection_lists_affected_vmcps() {
        let (storage, memory) = Storage::in_memory();
        memory.put_virtual_mcp(VirtualMcp {
            id: "vmcp_uses".to_string(),
            organization_id: "org-1".to_string(),
            title: "Uses".to_string(),
            metadata: None,
            connections: vec![meshmcp_core::model::VirtualMcpChild {
                connection_id: "conn_target".to_string(),
                ..Default::default()
            }],
            tool_selection_mode: ToolSelectionMode::Inclusion,
            tool_surface_mode: ToolSurfaceMode::Passthrough,
        });
        memory.put_virtual_mcp(VirtualMcp {
            id: "vmcp_other".to_string(),
            organization_id: "org-1".to_string(),
            title: "Other".to_string(),
            metadata: None,
            connections: vec![],
            tool_selection_mode: ToolSelectionMode::Inclusion,
            tool_surface_mode: ToolSurfaceMode::Passthrough,
        });

        let gateway = MeshGateway::new(storage, MeshConfig::default());
        let affected = gateway
            .invalidate_connection("org-1", "conn_target")
            .await
            .unwrap();
        assert_eq!(affected, vec!["vmcp_uses"]);
    }

    #[tokio::test]
    async fn test_open_virtual_wrong_org_is_not_found() {
        let (storage, memory) = Storage::in_memory();
        memory.put_virtual_mcp(VirtualMcp {
            id: "vmcp_a".to_string(),
            organization_id: "org-1".to_string(),
            title: "A".to_string(),
            metadata: None,
            connections: vec![],
            tool_selection_mode: ToolSelectionMode::Inclusion,
            tool_surface_mode: ToolSurfaceMode::Passthrough,
        });

        let gateway = MeshGateway::new(storage, MeshConfig::default());
        let ctx = RequestContext::new();
        let pool = ClientPool::new();
        let err = gateway
            .open_virtual("vmcp_a", Some("org-2"), &ctx, &pool)
            .await
            .unwrap_err();
        assert_eq!(err.kind, meshmcp_core::ErrorKind::NotFound);
    }
}
