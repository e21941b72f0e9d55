//! Typed identifier prefixes and minting.
//!
//! All entity ids in the mesh are opaque strings carrying a short type
//! prefix (`conn_`, `gw_`, `vmcp_`, `dtok_`, `audit_`) followed by a
//! hyphen-less UUID. Prefixes are checked, never parsed beyond that.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Prefix for connection ids
pub const CONNECTION_PREFIX: &str = "conn_";

/// Prefix for gateway request ids
pub const GATEWAY_PREFIX: &str = "gw_";

/// Prefix for Virtual MCP ids
pub const VIRTUAL_MCP_PREFIX: &str = "vmcp_";

/// Prefix for downstream token ids
pub const DOWNSTREAM_TOKEN_PREFIX: &str = "dtok_";

/// Prefix for audit record ids
pub const AUDIT_PREFIX: &str = "audit_";

/// Scheme used by VIRTUAL connection urls (`virtual://vmcp_…`)
pub const VIRTUAL_URL_SCHEME: &str = "virtual";

fn mint(prefix: &str) -> String {
    format!("{prefix}{}", Uuid::new_v4().simple())
}

/// Mint a fresh connection id
pub fn mint_connection_id() -> String {
    mint(CONNECTION_PREFIX)
}

/// Mint a fresh gateway request id
pub fn mint_request_id() -> String {
    mint(GATEWAY_PREFIX)
}

/// Mint a fresh Virtual MCP id
pub fn mint_virtual_mcp_id() -> String {
    mint(VIRTUAL_MCP_PREFIX)
}

/// Mint a fresh audit record id
pub fn mint_audit_id() -> String {
    mint(AUDIT_PREFIX)
}

/// Opaque connection identifier (`conn_…`)
pub type ConnectionId = String;

/// Opaque organization identifier
pub type OrganizationId = String;

/// Opaque Virtual MCP identifier (`vmcp_…`)
pub type VirtualMcpId = String;

/// Whether `id` carries the connection prefix
pub fn is_connection_id(id: &str) -> bool {
    id.starts_with(CONNECTION_PREFIX)
}

/// Whether `id` carries the Virtual MCP prefix
pub fn is_virtual_mcp_id(id: &str) -> bool {
    id.starts_with(VIRTUAL_MCP_PREFIX)
}

/// Extract the Virtual MCP id a `virtual://` connection url points at.
///
/// Returns `None` for any other scheme or shape. The id embedded in the url
/// is informational; self-reference checks compare connection ids directly.
pub fn virtual_mcp_id_from_url(url: &str) -> Option<&str> {
    let rest = url.strip_prefix(VIRTUAL_URL_SCHEME)?.strip_prefix("://")?;
    let id = rest.trim_end_matches('/');
    if id.is_empty() { None } else { Some(id) }
}

/// A JSON-RPC message id: string or integer, kept verbatim for correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageId {
    /// String identifier
    String(String),
    /// Numeric identifier
    Number(i64),
}

impl MessageId {
    /// Render the id for logging and map keys
    pub fn as_key(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Number(n) => n.to_string(),
        }
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for MessageId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}
