//! # Meshmcp Protocol
//!
//! JSON-RPC 2.0 framing and MCP wire types shared by the transport, client
//! and gateway crates. The gateway forwards most payloads verbatim; the
//! types here are the ones it needs to inspect, synthesize or rewrite.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod jsonrpc;
pub mod types;
pub mod validation;

pub use jsonrpc::{
    JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    JsonRpcVersion, error_codes,
};
pub use validation::{ProtocolValidator, ValidationResult};
pub use types::{
    CallToolRequest, CallToolResult, ClientCapabilities, ContentBlock, GetPromptRequest,
    GetPromptResult, Implementation, InitializeRequest, InitializeResult, ListPromptsResult,
    ListResourceTemplatesResult, ListResourcesResult, ListToolsResult, Prompt, PromptArgument,
    PromptMessage, PromptsCapabilities, ReadResourceRequest, ReadResourceResult, Resource,
    ResourceContents, ResourceTemplate, ResourcesCapabilities, Role, ServerCapabilities,
    TextContent, TextResourceContents, Tool, ToolArguments, ToolSchema, ToolsCapabilities,
};

/// MCP method names routed by the mesh
pub mod methods {
    /// Initialize handshake
    pub const INITIALIZE: &str = "initialize";
    /// Initialized notification
    pub const INITIALIZED: &str = "notifications/initialized";
    /// Liveness check
    pub const PING: &str = "ping";
    /// List tools
    pub const TOOLS_LIST: &str = "tools/list";
    /// Call a tool
    pub const TOOLS_CALL: &str = "tools/call";
    /// List resources
    pub const RESOURCES_LIST: &str = "resources/list";
    /// List resource templates
    pub const RESOURCES_TEMPLATES_LIST: &str = "resources/templates/list";
    /// Read a resource
    pub const RESOURCES_READ: &str = "resources/read";
    /// List prompts
    pub const PROMPTS_LIST: &str = "prompts/list";
    /// Get a prompt
    pub const PROMPTS_GET: &str = "prompts/get";
}
