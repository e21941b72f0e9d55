//! The MCP service surface shared by clients, aggregators and strategies.
//!
//! Everything that looks like an MCP server to the mesh implements this
//! trait: the concrete [`Client`](crate::Client), the Virtual MCP
//! aggregator, and the strategy wrappers that rewrite its tool surface.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::{Map, Value};

use meshmcp_core::Result;
use meshmcp_protocol::{
    CallToolResult, GetPromptResult, Prompt, ReadResourceResult, Resource, ResourceTemplate, Tool,
    ToolArguments,
};

/// A stream of tool-call result chunks
pub type ToolCallStream = Pin<Box<dyn Stream<Item = Result<CallToolResult>> + Send>>;

/// Object-safe MCP service surface.
#[async_trait]
pub trait McpService: Send + Sync + fmt::Debug {
    /// List the tools this service exposes
    async fn list_tools(&self) -> Result<Vec<Tool>>;

    /// Call a tool by name, forwarding `arguments` unchanged
    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<ToolArguments>,
    ) -> Result<CallToolResult>;

    /// List the resources this service exposes
    async fn list_resources(&self) -> Result<Vec<Resource>>;

    /// List the resource templates this service exposes
    async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>>;

    /// Read a resource by URI
    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult>;

    /// List the prompts this service exposes
    async fn list_prompts(&self) -> Result<Vec<Prompt>>;

    /// Get a prompt by name
    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<GetPromptResult>;

    /// Instructions surfaced by the server handshake, when any
    fn instructions(&self) -> Option<String> {
        None
    }

    /// Liveness check
    async fn ping(&self) -> Result<()>;

    /// Release the service and everything downstream of it
    async fn close(&self) -> Result<()>;

    /// Call a tool with a streamed result.
    ///
    /// Services without streaming support execute the plain call and wrap
    /// the result as a one-shot stream.
    async fn call_tool_streaming(
        &self,
        name: &str,
        arguments: Option<ToolArguments>,
    ) -> Result<ToolCallStream> {
        let result = self.call_tool(name, arguments).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(result) })))
    }
}
