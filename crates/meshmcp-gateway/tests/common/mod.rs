//! Shared fakes for gateway tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value, json};

use meshmcp_client::McpService;
use meshmcp_core::model::{Connection, ConnectionStatus, ConnectionType};
use meshmcp_core::{Error, Result};
use meshmcp_protocol::{
    CallToolResult, GetPromptResult, Prompt, PromptMessage, ReadResourceResult, Resource,
    ResourceContents, ResourceTemplate, Role, TextResourceContents, Tool, ToolArguments,
    ToolSchema,
};

/// Build a tool definition
pub fn tool(name: &str, description: &str) -> Tool {
    Tool {
        name: name.to_string(),
        title: None,
        description: Some(description.to_string()),
        input_schema: ToolSchema::any_object(),
        output_schema: None,
        meta: None,
    }
}

/// Build a resource definition
pub fn resource(uri: &str) -> Resource {
    Resource {
        name: uri.rsplit('/').next().unwrap_or(uri).to_string(),
        uri: uri.to_string(),
        description: None,
        mime_type: None,
        size: None,
    }
}

/// Build a prompt definition
pub fn prompt(name: &str) -> Prompt {
    Prompt {
        name: name.to_string(),
        description: None,
        arguments: None,
    }
}

/// Build an active HTTP connection record
pub fn connection(id: &str, title: &str) -> Connection {
    Connection {
        id: id.to_string(),
        organization_id: "org-1".to_string(),
        title: title.to_string(),
        description: None,
        icon: None,
        connection_type: ConnectionType::Http,
        connection_url: Some(format!("https://{id}.example/mcp")),
        connection_token: None,
        connection_headers: None,
        stdio: None,
        status: ConnectionStatus::Active,
        tools: Vec::new(),
        configuration_state: None,
        configuration_scopes: None,
    }
}

/// One recorded tool call
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub tool: String,
    pub arguments: Option<ToolArguments>,
}

/// Scriptable fake downstream MCP service.
#[derive(Debug, Default)]
pub struct FakeService {
    pub tools: Vec<Tool>,
    pub resources: Vec<Resource>,
    pub templates: Vec<ResourceTemplate>,
    pub prompts: Vec<Prompt>,
    pub fail_tool_listing: AtomicBool,
    pub list_tool_calls: AtomicUsize,
    pub calls: Mutex<Vec<RecordedCall>>,
    pub closed: AtomicBool,
}

impl FakeService {
    pub fn with_tools(tools: Vec<Tool>) -> Arc<Self> {
        Arc::new(Self {
            tools,
            ..Default::default()
        })
    }

    pub fn with_resources(resources: Vec<Resource>) -> Arc<Self> {
        Arc::new(Self {
            resources,
            ..Default::default()
        })
    }

    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl McpService for FakeService {
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        self.list_tool_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_tool_listing.load(Ordering::SeqCst) {
            return Err(Error::transport("listing exploded"));
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<ToolArguments>,
    ) -> Result<CallToolResult> {
        self.calls.lock().push(RecordedCall {
            tool: name.to_string(),
            arguments: arguments.clone(),
        });
        Ok(CallToolResult::text(format!("handled {name}")))
    }

    async fn list_resources(&self) -> Result<Vec<Resource>> {
        Ok(self.resources.clone())
    }

    async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>> {
        Ok(self.templates.clone())
    }

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        Ok(ReadResourceResult {
            contents: vec![ResourceContents::Text(TextResourceContents {
                uri: uri.to_string(),
                mime_type: Some("text/plain".to_string()),
                text: format!("contents of {uri}"),
            })],
        })
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        Ok(self.prompts.clone())
    }

    async fn get_prompt(
        &self,
        name: &str,
        _arguments: Option<Map<String, Value>>,
    ) -> Result<GetPromptResult> {
        Ok(GetPromptResult {
            description: None,
            messages: vec![PromptMessage {
                role: Role::User,
                content: meshmcp_protocol::ContentBlock::text(format!("prompt {name}")),
            }],
        })
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Parse the JSON payload out of a meta-tool text result
pub fn payload(result: &CallToolResult) -> Value {
    let text = result.content[0].as_text().expect("text payload");
    serde_json::from_str(text).unwrap_or_else(|_| json!({"raw": text}))
}
