//! MCP server loop: serves an [`McpService`] over a transport.
//!
//! The Virtual MCP bridge runs this loop over one half of an in-memory
//! transport pair, so consumers talk to an aggregated surface through an
//! ordinary client. The loop answers the MCP method set the mesh routes and
//! rejects everything else with `method not found`.

use std::sync::Arc;

use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use meshmcp_client::McpService;
use meshmcp_core::{Error, ErrorKind, PROTOCOL_VERSION};
use meshmcp_protocol::{
    CallToolRequest, GetPromptRequest, Implementation, JsonRpcError, JsonRpcMessage,
    JsonRpcRequest, JsonRpcResponse, ListPromptsResult, ListResourceTemplatesResult,
    ListResourcesResult, ListToolsResult, PromptsCapabilities, ProtocolValidator,
    ReadResourceRequest, ResourcesCapabilities, ServerCapabilities, ToolsCapabilities,
    ValidationResult, error_codes, methods,
};
use meshmcp_transport::{Transport, TransportMessage};

/// MCP code for an unknown resource, per the resource error convention
const RESOURCE_NOT_FOUND: i32 = -32002;

/// Running server loop over one transport
#[derive(Debug)]
pub struct ServeHandle {
    task: JoinHandle<()>,
}

impl ServeHandle {
    /// Abort the serve loop
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Whether the loop has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Serve `service` over `transport` until the transport closes.
///
/// When the loop ends, the service is closed; the transport half owns
/// nothing else.
pub fn serve(
    mut transport: Box<dyn Transport>,
    service: Arc<dyn McpService>,
    server_name: impl Into<String>,
) -> ServeHandle {
    let server_name = server_name.into();
    let task = tokio::spawn(async move {
        let validator = ProtocolValidator::new();
        if let Err(e) = transport.start().await {
            warn!("Server transport failed to start: {e}");
            return;
        }
        loop {
            let message = match transport.receive().await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    warn!("Server transport receive failed: {e}");
                    break;
                }
            };
            let request = match message.parse() {
                Ok(JsonRpcMessage::Request(request)) => request,
                Ok(JsonRpcMessage::Notification(notification)) => {
                    debug!(method = %notification.method, "Notification received");
                    continue;
                }
                Ok(JsonRpcMessage::Response(_)) => continue,
                Err(e) => {
                    warn!("Unparseable message on server transport: {e}");
                    continue;
                }
            };

            let response = match validator.validate_request(&request) {
                ValidationResult::Valid => {
                    handle_request(&service, &server_name, &request).await
                }
                invalid => JsonRpcResponse::error(
                    JsonRpcError::invalid_params(&invalid.flatten()),
                    Some(request.id.clone()),
                ),
            };
            let Ok(message) = TransportMessage::from_json(&response) else {
                warn!("Failed to serialize response");
                continue;
            };
            if transport.send(message).await.is_err() {
                break;
            }
        }
        if let Err(e) = service.close().await {
            warn!("Service close failed after serve loop: {e}");
        }
    });
    ServeHandle { task }
}

async fn handle_request(
    service: &Arc<dyn McpService>,
    server_name: &str,
    request: &JsonRpcRequest,
) -> JsonRpcResponse {
    let id = request.id.clone();
    let result: Result<Value, Error> = dispatch(service, server_name, request).await;
    match result {
        Ok(value) => JsonRpcResponse::success(value, id),
        Err(error) => JsonRpcResponse::error(to_rpc_error(&error), Some(id)),
    }
}

async fn dispatch(
    service: &Arc<dyn McpService>,
    server_name: &str,
    request: &JsonRpcRequest,
) -> Result<Value, Error> {
    match request.method.as_str() {
        methods::INITIALIZE => {
            let result = meshmcp_protocol::InitializeResult {
                protocol_version: PROTOCOL_VERSION.to_string(),
                capabilities: ServerCapabilities {
                    experimental: None,
                    prompts: Some(PromptsCapabilities::default()),
                    resources: Some(ResourcesCapabilities::default()),
                    tools: Some(ToolsCapabilities::default()),
                },
                server_info: Implementation {
                    name: server_name.to_string(),
                    title: None,
                    version: meshmcp_core::GATEWAY_VERSION.to_string(),
                },
                instructions: service.instructions(),
            };
            Ok(serde_json::to_value(result)?)
        }
        methods::PING => Ok(json!({})),
        methods::TOOLS_LIST => {
            let tools = service.list_tools().await?;
            Ok(serde_json::to_value(ListToolsResult {
                tools,
                next_cursor: None,
            })?)
        }
        methods::TOOLS_CALL => {
            let call: CallToolRequest = parse_params(request)?;
            let result = service.call_tool(&call.name, call.arguments).await?;
            Ok(serde_json::to_value(result)?)
        }
        methods::RESOURCES_LIST => {
            let resources = service.list_resources().await?;
            Ok(serde_json::to_value(ListResourcesResult {
                resources,
                next_cursor: None,
            })?)
        }
        methods::RESOURCES_TEMPLATES_LIST => {
            let resource_templates = service.list_resource_templates().await?;
            Ok(serde_json::to_value(ListResourceTemplatesResult {
                resource_templates,
                next_cursor: None,
            })?)
        }
        methods::RESOURCES_READ => {
            let read: ReadResourceRequest = parse_params(request)?;
            let result = service.read_resource(&read.uri).await?;
            Ok(serde_json::to_value(result)?)
        }
        methods::PROMPTS_LIST => {
            let prompts = service.list_prompts().await?;
            Ok(serde_json::to_value(ListPromptsResult {
                prompts,
                next_cursor: None,
            })?)
        }
        methods::PROMPTS_GET => {
            let get: GetPromptRequest = parse_params(request)?;
            let result = service.get_prompt(&get.name, get.arguments).await?;
            Ok(serde_json::to_value(result)?)
        }
        other => Err(Error::rpc(
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {other}"),
        )),
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(request: &JsonRpcRequest) -> Result<T, Error> {
    let params = request.params.clone().unwrap_or(Value::Null);
    serde_json::from_value(params)
        .map_err(|e| Error::bad_request(format!("invalid params: {e}")))
}

fn to_rpc_error(error: &Error) -> JsonRpcError {
    let code = match error.kind {
        ErrorKind::NotFound => RESOURCE_NOT_FOUND,
        ErrorKind::MethodNotFound => error_codes::METHOD_NOT_FOUND,
        ErrorKind::BadRequest | ErrorKind::Validation => error_codes::INVALID_PARAMS,
        _ => error.rpc_code.unwrap_or(error_codes::INTERNAL_ERROR),
    };
    JsonRpcError::new(code, error.message.clone())
}
