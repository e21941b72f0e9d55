//! The Virtual MCP aggregator.
//!
//! Presents a set of child connections as one MCP service. Each of the four
//! surfaces (tools, resources, resource templates, prompts) is loaded
//! lazily and at most once at a time: the first caller triggers the load,
//! concurrent callers share it, a failed load is forgotten so the next
//! request retries. Identically named items across children deduplicate
//! first-wins in the order the children were configured, and a routing
//! table remembers the winning child for call routing.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared, join_all};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use meshmcp_client::{McpService, ToolCallStream};
use meshmcp_core::model::{Connection, ToolSelectionMode, VirtualMcpChild};
use meshmcp_core::{Error, Result};
use meshmcp_protocol::{
    CallToolResult, GetPromptResult, Prompt, ReadResourceResult, Resource, ResourceTemplate, Tool,
    ToolArguments,
};

use crate::selection::{name_selected, uri_selected};

/// One child of an aggregator: a live client plus its selection lists.
#[derive(Debug, Clone)]
pub struct AggregatorChild {
    /// Live client for the child connection
    pub client: Arc<dyn McpService>,
    /// The child's connection record
    pub connection: Connection,
    /// Selected tool names
    pub selected_tools: Option<Vec<String>>,
    /// Selected resource URI patterns
    pub selected_resources: Option<Vec<String>>,
    /// Selected prompt names
    pub selected_prompts: Option<Vec<String>>,
}

impl AggregatorChild {
    /// Pair a client with the selection lists of a Virtual MCP child entry
    pub fn new(client: Arc<dyn McpService>, connection: Connection, entry: &VirtualMcpChild) -> Self {
        Self {
            client,
            connection,
            selected_tools: entry.selected_tools.clone(),
            selected_resources: entry.selected_resources.clone(),
            selected_prompts: entry.selected_prompts.clone(),
        }
    }

    /// A child exposing everything (exclusion mode, unnamed connection)
    pub fn unfiltered(client: Arc<dyn McpService>, connection: Connection) -> Self {
        Self {
            client,
            connection,
            selected_tools: None,
            selected_resources: None,
            selected_prompts: None,
        }
    }
}

/// A loaded surface: the exposed items plus key → connection id routing.
#[derive(Debug, Clone)]
pub struct SurfaceCache<T> {
    /// Deduplicated items in child order
    pub items: Vec<T>,
    /// Routing map from item key (name or uri) to the winning child
    pub routes: HashMap<String, String>,
}

type LoadFuture<T> = Shared<BoxFuture<'static, std::result::Result<Arc<T>, Arc<Error>>>>;

/// Memoized load-once slot: one concurrent load, shared outcome, retry on
/// failure.
struct LoadCell<T> {
    slot: Mutex<Option<(u64, LoadFuture<T>)>>,
    generation: AtomicU64,
}

impl<T> std::fmt::Debug for LoadCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadCell")
            .field("generation", &self.generation)
            .finish()
    }
}

impl<T: Send + Sync + 'static> LoadCell<T> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }

    async fn get_or_load<F>(&self, load: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> BoxFuture<'static, Result<T>>,
    {
        let (generation, future) = {
            let mut slot = self.slot.lock().await;
            match slot.as_ref() {
                Some((generation, future)) => (*generation, future.clone()),
                None => {
                    let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let attempt = load();
                    let future: LoadFuture<T> = async move {
                        attempt.await.map(Arc::new).map_err(Arc::new)
                    }
                    .boxed()
                    .shared();
                    *slot = Some((generation, future.clone()));
                    (generation, future)
                }
            }
        };

        match future.await {
            Ok(value) => Ok(value),
            Err(error) => {
                // Forget this attempt so the next caller retries, unless a
                // newer load already took the slot.
                let mut slot = self.slot.lock().await;
                if matches!(slot.as_ref(), Some((g, _)) if *g == generation) {
                    *slot = None;
                }
                Err((*error).clone())
            }
        }
    }
}

/// Lazy, deduplicating aggregation of tools, resources, resource templates
/// and prompts across child clients.
#[derive(Debug)]
pub struct Aggregator {
    children: Vec<AggregatorChild>,
    mode: ToolSelectionMode,
    instructions: Option<String>,
    tools: LoadCell<SurfaceCache<Tool>>,
    resources: LoadCell<SurfaceCache<Resource>>,
    templates: LoadCell<Vec<ResourceTemplate>>,
    prompts: LoadCell<SurfaceCache<Prompt>>,
}

impl Aggregator {
    /// Build an aggregator over `children` with the given selection mode.
    ///
    /// `instructions` are the Virtual MCP's own; child instructions are not
    /// merged.
    pub fn new(
        children: Vec<AggregatorChild>,
        mode: ToolSelectionMode,
        instructions: Option<String>,
    ) -> Self {
        Self {
            children,
            mode,
            instructions,
            tools: LoadCell::new(),
            resources: LoadCell::new(),
            templates: LoadCell::new(),
            prompts: LoadCell::new(),
        }
    }

    /// The configured children, in order
    pub fn children(&self) -> &[AggregatorChild] {
        &self.children
    }

    /// Title of the child connection with this id, when present
    pub fn connection_title(&self, connection_id: &str) -> Option<&str> {
        self.children
            .iter()
            .find(|c| c.connection.id == connection_id)
            .map(|c| c.connection.title.as_str())
    }

    /// The loaded tool surface with routing
    pub async fn tool_surface(&self) -> Result<Arc<SurfaceCache<Tool>>> {
        let children = self.children.clone();
        let mode = self.mode;
        self.tools
            .get_or_load(move || {
                async move {
                    let loads = children.iter().map(|child| {
                        let client = child.client.clone();
                        async move { surface_or_empty(client.list_tools().await, "tools") }
                    });
                    // join_all keeps input order, so first-wins follows the
                    // configured child order regardless of arrival order.
                    let listings = join_all(loads).await;

                    let mut items = Vec::new();
                    let mut routes = HashMap::new();
                    let mut seen = HashSet::new();
                    for (child, tools) in children.iter().zip(listings) {
                        for tool in tools {
                            if !name_selected(&tool.name, child.selected_tools.as_deref(), mode) {
                                continue;
                            }
                            if !seen.insert(tool.name.clone()) {
                                continue;
                            }
                            routes.insert(tool.name.clone(), child.connection.id.clone());
                            items.push(tool);
                        }
                    }
                    debug!(tools = items.len(), "Aggregated tool surface loaded");
                    Ok(SurfaceCache { items, routes })
                }
                .boxed()
            })
            .await
    }

    /// The loaded resource surface with routing
    pub async fn resource_surface(&self) -> Result<Arc<SurfaceCache<Resource>>> {
        let children = self.children.clone();
        let mode = self.mode;
        self.resources
            .get_or_load(move || {
                async move {
                    let loads = children.iter().map(|child| {
                        let client = child.client.clone();
                        async move { surface_or_empty(client.list_resources().await, "resources") }
                    });
                    let listings = join_all(loads).await;

                    let mut items = Vec::new();
                    let mut routes = HashMap::new();
                    let mut seen = HashSet::new();
                    for (child, resources) in children.iter().zip(listings) {
                        for resource in resources {
                            if !uri_selected(
                                &resource.uri,
                                child.selected_resources.as_deref(),
                                mode,
                            ) {
                                continue;
                            }
                            if !seen.insert(resource.uri.clone()) {
                                continue;
                            }
                            routes.insert(resource.uri.clone(), child.connection.id.clone());
                            items.push(resource);
                        }
                    }
                    Ok(SurfaceCache { items, routes })
                }
                .boxed()
            })
            .await
    }

    /// The loaded prompt surface with routing
    pub async fn prompt_surface(&self) -> Result<Arc<SurfaceCache<Prompt>>> {
        let children = self.children.clone();
        let mode = self.mode;
        self.prompts
            .get_or_load(move || {
                async move {
                    let loads = children.iter().map(|child| {
                        let client = child.client.clone();
                        async move { surface_or_empty(client.list_prompts().await, "prompts") }
                    });
                    let listings = join_all(loads).await;

                    let mut items = Vec::new();
                    let mut routes = HashMap::new();
                    let mut seen = HashSet::new();
                    for (child, prompts) in children.iter().zip(listings) {
                        for prompt in prompts {
                            if !name_selected(&prompt.name, child.selected_prompts.as_deref(), mode)
                            {
                                continue;
                            }
                            if !seen.insert(prompt.name.clone()) {
                                continue;
                            }
                            routes.insert(prompt.name.clone(), child.connection.id.clone());
                            items.push(prompt);
                        }
                    }
                    Ok(SurfaceCache { items, routes })
                }
                .boxed()
            })
            .await
    }

    async fn template_surface(&self) -> Result<Arc<Vec<ResourceTemplate>>> {
        let children = self.children.clone();
        self.templates
            .get_or_load(move || {
                async move {
                    let loads = children.iter().map(|child| {
                        let client = child.client.clone();
                        async move {
                            surface_or_empty(
                                client.list_resource_templates().await,
                                "resource templates",
                            )
                        }
                    });
                    let listings = join_all(loads).await;
                    // Templates concatenate as-is, without dedup.
                    Ok(listings.into_iter().flatten().collect())
                }
                .boxed()
            })
            .await
    }

    fn child_by_connection(&self, connection_id: &str) -> Option<&AggregatorChild> {
        self.children
            .iter()
            .find(|c| c.connection.id == connection_id)
    }
}

/// Treat `MethodNotFound` as an empty surface; log and swallow other child
/// failures so one child never takes down the whole load.
fn surface_or_empty<T>(result: Result<Vec<T>>, surface: &str) -> Vec<T> {
    match result {
        Ok(items) => items,
        Err(error) if error.is_method_not_found() => Vec::new(),
        Err(error) => {
            warn!("Child {surface} listing failed, treating as empty: {error}");
            Vec::new()
        }
    }
}

#[async_trait]
impl McpService for Aggregator {
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        Ok(self.tool_surface().await?.items.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<ToolArguments>,
    ) -> Result<CallToolResult> {
        let surface = self.tool_surface().await?;
        let Some(connection_id) = surface.routes.get(name) else {
            return Ok(CallToolResult::error(format!("Tool not found: {name}")));
        };
        let child = self
            .child_by_connection(connection_id)
            .ok_or_else(|| Error::internal("routing table names unknown child"))?;
        // The original tool name and arguments pass through unchanged; the
        // result comes back verbatim, isError included.
        child.client.call_tool(name, arguments).await
    }

    async fn list_resources(&self) -> Result<Vec<Resource>> {
        Ok(self.resource_surface().await?.items.clone())
    }

    async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>> {
        Ok(self.template_surface().await?.as_ref().clone())
    }

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        let surface = self.resource_surface().await?;
        let Some(connection_id) = surface.routes.get(uri) else {
            return Err(Error::not_found(format!("Resource not found: {uri}")));
        };
        let child = self
            .child_by_connection(connection_id)
            .ok_or_else(|| Error::internal("routing table names unknown child"))?;
        child.client.read_resource(uri).await
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        Ok(self.prompt_surface().await?.items.clone())
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<GetPromptResult> {
        let surface = self.prompt_surface().await?;
        let Some(connection_id) = surface.routes.get(name) else {
            return Err(Error::not_found(format!("Prompt not found: {name}")));
        };
        let child = self
            .child_by_connection(connection_id)
            .ok_or_else(|| Error::internal("routing table names unknown child"))?;
        child.client.get_prompt(name, arguments).await
    }

    fn instructions(&self) -> Option<String> {
        self.instructions.clone()
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let closes = self.children.iter().map(|child| {
            let client = child.client.clone();
            let connection_id = child.connection.id.clone();
            async move {
                if let Err(e) = client.close().await {
                    warn!(connection_id = %connection_id, "Child close failed: {e}");
                }
            }
        });
        join_all(closes).await;
        Ok(())
    }

    async fn call_tool_streaming(
        &self,
        name: &str,
        arguments: Option<ToolArguments>,
    ) -> Result<ToolCallStream> {
        let surface = self.tool_surface().await?;
        let Some(connection_id) = surface.routes.get(name) else {
            let result = CallToolResult::error(format!("Tool not found: {name}"));
            return Ok(Box::pin(futures::stream::once(async move { Ok(result) })));
        };
        let child = self
            .child_by_connection(connection_id)
            .ok_or_else(|| Error::internal("routing table names unknown child"))?;
        child.client.call_tool_streaming(name, arguments).await
    }
}
