//! Virtual MCP bridge.
//!
//! Resolves a Virtual MCP entity into a live aggregator and exposes it as a
//! normal MCP client over an in-memory transport pair: one half is served
//! by the dispatch loop, the other is handed to a `Client`, so consumers
//! never know they are talking to an in-process composition.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use meshmcp_client::{Client, ClientFactory, ClientOptions, ClientPool, VirtualClientResolver};
use meshmcp_core::context::RequestContext;
use meshmcp_core::id::virtual_mcp_id_from_url;
use meshmcp_core::model::{Connection, ConnectionType, ToolSelectionMode, VirtualMcp};
use meshmcp_core::storage::Storage;
use meshmcp_core::{Error, Result};
use meshmcp_transport::MemoryTransport;

use crate::aggregator::{Aggregator, AggregatorChild};
use crate::strategy;

/// A child selected for aggregation, before its client is connected.
#[derive(Debug, Clone)]
struct PlannedChild {
    connection: Connection,
    selected_tools: Option<Vec<String>>,
    selected_resources: Option<Vec<String>>,
    selected_prompts: Option<Vec<String>>,
}

/// Opens Virtual MCPs as in-process MCP servers.
#[derive(Debug, Clone)]
pub struct VirtualMcpBridge {
    storage: Storage,
    factory: ClientFactory,
}

impl VirtualMcpBridge {
    /// Create a bridge over the given storage and client factory
    pub fn new(storage: Storage, factory: ClientFactory) -> Self {
        Self { storage, factory }
    }

    /// Open the Virtual MCP `vmcp_id` and return a client for it.
    ///
    /// Children resolve in parallel; inactive connections, self-references
    /// and children whose client fails to connect are dropped without
    /// failing the bridge. Closing the returned client tears down the serve
    /// loop, the aggregator and every child client.
    pub async fn open(
        &self,
        vmcp_id: &str,
        organization_id: Option<&str>,
        ctx: &RequestContext,
        request_pool: &ClientPool,
    ) -> Result<Client> {
        let vmcp = self
            .storage
            .virtual_mcps
            .find_by_id(vmcp_id, organization_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Virtual MCP not found: {vmcp_id}")))?;

        let ctx = ctx.clone().with_virtual_mcp(vmcp.id.clone());
        let planned = match vmcp.tool_selection_mode {
            ToolSelectionMode::Inclusion => self.inclusion_children(&vmcp).await?,
            ToolSelectionMode::Exclusion => self.exclusion_children(&vmcp).await?,
        };
        let children = self.connect_children(planned, &ctx, request_pool).await;

        let aggregator = Arc::new(Aggregator::new(
            children,
            vmcp.tool_selection_mode,
            vmcp.instructions().map(String::from),
        ));
        let surface = strategy::decorate(aggregator, vmcp.tool_surface_mode);

        let (client_half, server_half) = MemoryTransport::pair();
        let _serve = crate::server::serve(Box::new(server_half), surface, vmcp.title.clone());
        Client::connect(Box::new(client_half), ClientOptions::default()).await
    }

    /// Connect planned children in parallel with independent failure.
    async fn connect_children(
        &self,
        planned: Vec<PlannedChild>,
        ctx: &RequestContext,
        request_pool: &ClientPool,
    ) -> Vec<AggregatorChild> {
        let connects = planned.into_iter().map(|child| {
            let factory = self.factory.clone();
            let ctx = ctx.clone();
            let pool = request_pool.clone();
            async move {
                match factory.client_for(&child.connection, &ctx, &pool).await {
                    Ok(client) => Some(AggregatorChild {
                        client: Arc::new(client),
                        connection: child.connection,
                        selected_tools: child.selected_tools,
                        selected_resources: child.selected_resources,
                        selected_prompts: child.selected_prompts,
                    }),
                    Err(e) => {
                        warn!(
                            connection_id = %child.connection.id,
                            "Dropping unreachable Virtual MCP child: {e}"
                        );
                        None
                    }
                }
            }
        });
        join_all(connects).await.into_iter().flatten().collect()
    }

    async fn inclusion_children(&self, vmcp: &VirtualMcp) -> Result<Vec<PlannedChild>> {
        let lookups = vmcp.connections.iter().map(|entry| {
            let connections = self.storage.connections.clone();
            async move { (entry, connections.find_by_id(&entry.connection_id).await) }
        });
        let resolved = join_all(lookups).await;

        let mut planned = Vec::new();
        for (entry, lookup) in resolved {
            let connection = match lookup {
                Ok(Some(connection)) => connection,
                Ok(None) => {
                    warn!(connection_id = %entry.connection_id, "Virtual MCP child not found");
                    continue;
                }
                Err(e) => {
                    warn!(connection_id = %entry.connection_id, "Child lookup failed: {e}");
                    continue;
                }
            };
            if !eligible(&connection, vmcp) {
                continue;
            }
            planned.push(PlannedChild {
                connection,
                selected_tools: entry.selected_tools.clone(),
                selected_resources: entry.selected_resources.clone(),
                selected_prompts: entry.selected_prompts.clone(),
            });
        }
        Ok(planned)
    }

    /// Exclusion mode builds the child list from every active org
    /// connection: unnamed connections pass everything through; a named
    /// child with only empty lists is dropped whole; otherwise its lists
    /// run as exclusion filters in the aggregator.
    async fn exclusion_children(&self, vmcp: &VirtualMcp) -> Result<Vec<PlannedChild>> {
        let all = self.storage.connections.list(&vmcp.organization_id).await?;

        let mut planned = Vec::new();
        for connection in all {
            if !eligible(&connection, vmcp) {
                continue;
            }
            match vmcp.child(&connection.id) {
                None => planned.push(PlannedChild {
                    connection,
                    selected_tools: None,
                    selected_resources: None,
                    selected_prompts: None,
                }),
                Some(entry) => {
                    let all_empty = is_empty_selection(entry.selected_tools.as_deref())
                        && is_empty_selection(entry.selected_resources.as_deref())
                        && is_empty_selection(entry.selected_prompts.as_deref());
                    if all_empty {
                        debug!(connection_id = %connection.id, "Excluding whole child");
                        continue;
                    }
                    planned.push(PlannedChild {
                        connection,
                        selected_tools: entry.selected_tools.clone(),
                        selected_resources: entry.selected_resources.clone(),
                        selected_prompts: entry.selected_prompts.clone(),
                    });
                }
            }
        }
        Ok(planned)
    }
}

fn is_empty_selection(list: Option<&[String]>) -> bool {
    list.map_or(true, <[String]>::is_empty)
}

/// Active, and not a self-reference.
fn eligible(connection: &Connection, vmcp: &VirtualMcp) -> bool {
    if !connection.is_active() {
        debug!(connection_id = %connection.id, "Skipping inactive child");
        return false;
    }
    // The connection id is authoritative for cycle detection; the
    // virtual:// url is checked as well for virtual children.
    if connection.id == vmcp.id {
        warn!(connection_id = %connection.id, "Dropping self-referencing child");
        return false;
    }
    if connection.connection_type == ConnectionType::Virtual {
        let target = connection
            .connection_url
            .as_deref()
            .and_then(virtual_mcp_id_from_url);
        if target == Some(vmcp.id.as_str()) {
            warn!(connection_id = %connection.id, "Dropping self-referencing virtual child");
            return false;
        }
    }
    true
}


#[async_trait]
impl VirtualClientResolver for VirtualMcpBridge {
    async fn open(&self, connection: &Connection, ctx: &RequestContext) -> Result<Client> {
        let url = connection
            .connection_url
            .as_deref()
            .ok_or_else(|| Error::validation("virtual connection has no url"))?;
        let vmcp_id = virtual_mcp_id_from_url(url)
            .ok_or_else(|| Error::validation(format!("not a virtual url: {url}")))?;
        let pool = ClientPool::new();
        VirtualMcpBridge::open(self, vmcp_id, Some(&connection.organization_id), ctx, &pool).await
    }
}
