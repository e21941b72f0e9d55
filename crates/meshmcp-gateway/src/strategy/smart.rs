//! Smart-selection and code-execution strategy services.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};

use meshmcp_client::McpService;
use meshmcp_core::Result;
use meshmcp_protocol::{
    CallToolResult, GetPromptResult, Prompt, ReadResourceResult, Resource, ResourceTemplate, Tool,
    ToolArguments, ToolSchema,
};

use crate::aggregator::Aggregator;
use crate::sandbox::{DEFAULT_TIMEOUT_MS, Sandbox};

use super::meta::{
    CALL_TOOL, DESCRIBE_TOOL, MetaTools, RUN_CODE_TOOL, SEARCH_TOOL, json_error, json_result,
};

/// Strategy exposing `GATEWAY_SEARCH_TOOLS` / `GATEWAY_DESCRIBE_TOOLS` /
/// `GATEWAY_CALL_TOOL` instead of the aggregated tool surface.
#[derive(Debug)]
pub struct SmartSelectionService {
    meta: MetaTools,
}

impl SmartSelectionService {
    /// Wrap an aggregator
    pub fn new(aggregator: Arc<Aggregator>) -> Self {
        Self {
            meta: MetaTools::new(aggregator),
        }
    }
}

#[async_trait]
impl McpService for SmartSelectionService {
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.meta.definitions().await
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<ToolArguments>,
    ) -> Result<CallToolResult> {
        match name {
            SEARCH_TOOL => self.meta.search(arguments).await,
            DESCRIBE_TOOL => self.meta.describe(arguments).await,
            CALL_TOOL => self.meta.call(arguments).await,
            other => Ok(CallToolResult::error(format!("Tool not found: {other}"))),
        }
    }

    async fn list_resources(&self) -> Result<Vec<Resource>> {
        self.meta.aggregator.list_resources().await
    }

    async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>> {
        self.meta.aggregator.list_resource_templates().await
    }

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        self.meta.aggregator.read_resource(uri).await
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        self.meta.aggregator.list_prompts().await
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<GetPromptResult> {
        self.meta.aggregator.get_prompt(name, arguments).await
    }

    fn instructions(&self) -> Option<String> {
        self.meta.aggregator.instructions()
    }

    async fn ping(&self) -> Result<()> {
        self.meta.aggregator.ping().await
    }

    async fn close(&self) -> Result<()> {
        self.meta.aggregator.close().await
    }
}

#[derive(Debug, Deserialize)]
struct RunCodeArgs {
    code: String,
    #[serde(rename = "timeoutMs", default)]
    timeout_ms: Option<u64>,
}

/// Strategy adding `GATEWAY_RUN_CODE` on top of the smart-selection
/// meta-tools.
#[derive(Debug)]
pub struct CodeExecutionService {
    meta: MetaTools,
    sandbox: Sandbox,
}

impl CodeExecutionService {
    /// Wrap an aggregator with a sandbox
    pub fn new(aggregator: Arc<Aggregator>, sandbox: Sandbox) -> Self {
        Self {
            meta: MetaTools::new(aggregator),
            sandbox,
        }
    }

    async fn run_code(&self, arguments: Option<ToolArguments>) -> Result<CallToolResult> {
        let args: RunCodeArgs = match serde_json::from_value(Value::Object(
            arguments.unwrap_or_default(),
        )) {
            Ok(args) => args,
            Err(e) => return Ok(json_error(format!("invalid arguments: {e}"))),
        };
        let timeout = Duration::from_millis(args.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
        let tools: Arc<dyn McpService> = self.meta.aggregator.clone();
        let outcome = self.sandbox.run_code(&args.code, timeout, tools).await;
        Ok(json_result(&serde_json::to_value(outcome)?))
    }
}

#[async_trait]
impl McpService for CodeExecutionService {
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        let mut tools = self.meta.definitions().await?;

        let mut properties = Map::new();
        properties.insert(
            "code".to_string(),
            serde_json::json!({
                "type": "string",
                "description": "Script whose final expression is the result; call tools via tools.call(name, args)"
            }),
        );
        properties.insert(
            "timeoutMs".to_string(),
            serde_json::json!({"type": "integer", "default": DEFAULT_TIMEOUT_MS}),
        );
        tools.push(Tool {
            name: RUN_CODE_TOOL.to_string(),
            title: None,
            description: Some(
                "Run a script against the available tools inside a bounded sandbox".to_string(),
            ),
            input_schema: ToolSchema::object(properties, vec!["code".to_string()]),
            output_schema: None,
            meta: None,
        });
        Ok(tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<ToolArguments>,
    ) -> Result<CallToolResult> {
        match name {
            SEARCH_TOOL => self.meta.search(arguments).await,
            DESCRIBE_TOOL => self.meta.describe(arguments).await,
            CALL_TOOL => self.meta.call(arguments).await,
            RUN_CODE_TOOL => self.run_code(arguments).await,
            other => Ok(CallToolResult::error(format!("Tool not found: {other}"))),
        }
    }

    async fn list_resources(&self) -> Result<Vec<Resource>> {
        self.meta.aggregator.list_resources().await
    }

    async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>> {
        self.meta.aggregator.list_resource_templates().await
    }

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        self.meta.aggregator.read_resource(uri).await
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        self.meta.aggregator.list_prompts().await
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<GetPromptResult> {
        self.meta.aggregator.get_prompt(name, arguments).await
    }

    fn instructions(&self) -> Option<String> {
        self.meta.aggregator.instructions()
    }

    async fn ping(&self) -> Result<()> {
        self.meta.aggregator.ping().await
    }

    async fn close(&self) -> Result<()> {
        self.meta.aggregator.close().await
    }
}
