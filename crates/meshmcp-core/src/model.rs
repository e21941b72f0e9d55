//! Mesh data model: connections, Virtual MCPs and downstream tokens.
//!
//! These records are owned by the surrounding platform (dashboard CRUD,
//! migrations); the gateway only reads them through the storage traits and
//! holds the invariants called out on each type.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How a downstream MCP server is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    /// Child process speaking newline-delimited JSON on stdio
    #[serde(rename = "STDIO")]
    Stdio,
    /// HTTP streamable transport
    #[serde(rename = "HTTP")]
    Http,
    /// Server-Sent Events transport
    #[serde(rename = "SSE")]
    Sse,
    /// WebSocket transport
    #[serde(rename = "Websocket")]
    Websocket,
    /// Another Virtual MCP in the same organization
    #[serde(rename = "VIRTUAL")]
    Virtual,
}

/// Lifecycle status of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// Connection is usable
    Active,
    /// Connection is administratively disabled
    Inactive,
    /// Connection is failing
    Error,
}

/// Launch specification for stdio connections.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StdioCommand {
    /// Executable to spawn
    pub command: String,
    /// Arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables set for the child
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Working directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

/// Snapshot of one downstream tool recorded at connection create/update.
///
/// The aggregator always consults a live `tools/list`; this snapshot feeds
/// dashboards and search only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name
    pub name: String,
    /// Tool description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Input JSON schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    /// Output JSON schema
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
}

/// Persistent configuration for reaching one downstream MCP server.
///
/// Invariant: a `Virtual` connection's url encodes the id of a
/// [`VirtualMcp`] in the same organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    /// Connection id (`conn_…`)
    pub id: String,
    /// Owning organization
    pub organization_id: String,
    /// Display title
    pub title: String,
    /// Description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Icon reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Transport selector
    pub connection_type: ConnectionType,
    /// Endpoint url; required for HTTP/SSE/Websocket/Virtual
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_url: Option<String>,
    /// Static bearer token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_token: Option<String>,
    /// Extra headers sent on every HTTP-family request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_headers: Option<HashMap<String, String>>,
    /// Launch spec when `connection_type == Stdio`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdio: Option<StdioCommand>,
    /// Lifecycle status
    pub status: ConnectionStatus,
    /// Recorded tool catalog snapshot
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
    /// Opaque state referenced by other connections
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration_state: Option<Map<String, Value>>,
    /// Granted scopes, entries `"KEY::SCOPE"` or `"*"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configuration_scopes: Option<Vec<String>>,
}

impl Connection {
    /// Whether the connection is usable
    pub fn is_active(&self) -> bool {
        self.status == ConnectionStatus::Active
    }

    /// Connection permissions derived from configuration state and scopes.
    ///
    /// Every key of `configuration_state` whose value names a connection id
    /// becomes an entry `referenced_connection_id → [scopes]`, where the
    /// scopes are the `KEY::SCOPE` grants for that key; a `"*"` grant gives
    /// every key a wildcard scope.
    pub fn connection_permissions(&self) -> HashMap<String, Vec<String>> {
        let mut permissions: HashMap<String, Vec<String>> = HashMap::new();
        let Some(state) = &self.configuration_state else {
            return permissions;
        };
        let scopes = self.configuration_scopes.as_deref().unwrap_or(&[]);
        let wildcard = scopes.iter().any(|s| s == "*");

        for (key, value) in state {
            let Some(referenced) = value.as_str() else {
                continue;
            };
            if !referenced.starts_with(crate::id::CONNECTION_PREFIX) {
                continue;
            }
            let mut granted: Vec<String> = scopes
                .iter()
                .filter_map(|entry| {
                    let (entry_key, scope) = entry.split_once("::")?;
                    (entry_key == key).then(|| scope.to_string())
                })
                .collect();
            if wildcard && granted.is_empty() {
                granted.push("*".to_string());
            }
            if !granted.is_empty() {
                permissions
                    .entry(referenced.to_string())
                    .or_default()
                    .extend(granted);
            }
        }
        permissions
    }
}

/// Tool selection semantics for a Virtual MCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolSelectionMode {
    /// Selected items are the only ones exposed
    #[default]
    Inclusion,
    /// Selected items are removed; everything else is exposed
    Exclusion,
}

/// One child of a Virtual MCP with per-child selection lists.
///
/// For tools and prompts entries match by exact name; for resources each
/// entry is a URI pattern (`*` within a path segment, `**` across segments).
/// Null/empty lists mean "nothing" in inclusion mode and "no exclusions" in
/// exclusion mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VirtualMcpChild {
    /// Referenced connection
    pub connection_id: String,
    /// Selected tool names
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_tools: Option<Vec<String>>,
    /// Selected resource URI patterns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_resources: Option<Vec<String>>,
    /// Selected prompt names
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_prompts: Option<Vec<String>>,
}

/// Tool-surface strategy configured on a Virtual MCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolSurfaceMode {
    /// Expose aggregated tools as-is
    #[default]
    Passthrough,
    /// Replace the surface with search/describe/call meta-tools
    SmartSelection,
    /// Smart selection plus sandboxed code execution
    CodeExecution,
}

/// An organization-level composition of connections exposed as one server.
///
/// Invariants: children must belong to the same organization, and no child
/// may resolve to this Virtual MCP itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualMcp {
    /// Virtual MCP id (`vmcp_…`)
    pub id: String,
    /// Owning organization
    pub organization_id: String,
    /// Display title
    pub title: String,
    /// Free-form metadata; `instructions` is surfaced in the MCP handshake
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Child connections with selection
    #[serde(default)]
    pub connections: Vec<VirtualMcpChild>,
    /// Selection semantics
    #[serde(default)]
    pub tool_selection_mode: ToolSelectionMode,
    /// Tool surface strategy
    #[serde(default)]
    pub tool_surface_mode: ToolSurfaceMode,
}

impl VirtualMcp {
    /// Instructions surfaced as MCP server instructions, when present
    pub fn instructions(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.get("instructions"))
            .and_then(Value::as_str)
    }

    /// The child entry naming `connection_id`, when any
    pub fn child(&self, connection_id: &str) -> Option<&VirtualMcpChild> {
        self.connections
            .iter()
            .find(|c| c.connection_id == connection_id)
    }
}

/// Per-connection OAuth tuple for a downstream server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownstreamToken {
    /// Connection the token belongs to
    pub connection_id: String,
    /// User scope, when tokens are per-user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Current access token
    pub access_token: String,
    /// Refresh token, when the grant supports refresh
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Token endpoint for refresh
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_endpoint: Option<String>,
    /// OAuth client id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    /// OAuth client secret
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Granted scope
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Expiry instant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Last update instant
    pub updated_at: DateTime<Utc>,
}

impl DownstreamToken {
    /// Whether a refresh can be attempted
    pub fn is_refreshable(&self) -> bool {
        self.refresh_token.is_some() && self.token_endpoint.is_some()
    }

    /// Whether the token is expired at `now`.
    ///
    /// The 5-minute leeway applies only when a refresh is possible; a
    /// non-refreshable token stays valid until its exact expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        if self.is_refreshable() {
            now + Duration::minutes(5) >= expires_at
        } else {
            now >= expires_at
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn connection(state: Value, scopes: Option<Vec<&str>>) -> Connection {
        Connection {
            id: "conn_a".to_string(),
            organization_id: "org-1".to_string(),
            title: "A".to_string(),
            description: None,
            icon: None,
            connection_type: ConnectionType::Http,
            connection_url: Some("https://a.example/mcp".to_string()),
            connection_token: None,
            connection_headers: None,
            stdio: None,
            status: ConnectionStatus::Active,
            tools: Vec::new(),
            configuration_state: state.as_object().cloned(),
            configuration_scopes: scopes.map(|s| s.into_iter().map(String::from).collect()),
        }
    }

    #[test]
    fn test_connection_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&ConnectionType::Stdio).unwrap(),
            "\"STDIO\""
        );
        assert_eq!(
            serde_json::to_string(&ConnectionType::Websocket).unwrap(),
            "\"Websocket\""
        );
        let parsed: ConnectionType = serde_json::from_str("\"VIRTUAL\"").unwrap();
        assert_eq!(parsed, ConnectionType::Virtual);
    }

    #[test]
    fn test_connection_permissions_scoped() {
        let conn = connection(
            json!({"crm": "conn_crm123", "note": "not a connection"}),
            Some(vec!["crm::read", "crm::write", "other::read"]),
        );
        let perms = conn.connection_permissions();
        assert_eq!(
            perms.get("conn_crm123"),
            Some(&vec!["read".to_string(), "write".to_string()])
        );
        assert_eq!(perms.len(), 1);
    }

    #[test]
    fn test_connection_permissions_wildcard() {
        let conn = connection(json!({"crm": "conn_crm123"}), Some(vec!["*"]));
        let perms = conn.connection_permissions();
        assert_eq!(perms.get("conn_crm123"), Some(&vec!["*".to_string()]));
    }

    #[test]
    fn test_connection_permissions_empty() {
        let conn = connection(json!({"crm": "conn_crm123"}), None);
        assert!(conn.connection_permissions().is_empty());
    }

    #[test]
    fn test_token_expiry_leeway_only_when_refreshable() {
        let now = Utc::now();
        let mut token = DownstreamToken {
            connection_id: "conn_a".to_string(),
            user_id: None,
            access_token: "at".to_string(),
            refresh_token: Some("rt".to_string()),
            token_endpoint: Some("https://idp.example/token".to_string()),
            client_id: None,
            client_secret: None,
            scope: None,
            expires_at: Some(now + Duration::minutes(2)),
            updated_at: now,
        };
        // Refreshable: the 5 minute leeway makes a 2-minutes-out expiry stale.
        assert!(token.is_expired(now));

        token.refresh_token = None;
        assert!(!token.is_refreshable());
        assert!(!token.is_expired(now));
        assert!(token.is_expired(now + Duration::minutes(3)));
    }

    #[test]
    fn test_virtual_mcp_instructions() {
        let vmcp = VirtualMcp {
            id: "vmcp_x".to_string(),
            organization_id: "org-1".to_string(),
            title: "Bundle".to_string(),
            metadata: json!({"instructions": "Prefer search."}).as_object().cloned(),
            connections: vec![VirtualMcpChild {
                connection_id: "conn_a".to_string(),
                ..Default::default()
            }],
            tool_selection_mode: ToolSelectionMode::default(),
            tool_surface_mode: ToolSurfaceMode::default(),
        };
        assert_eq!(vmcp.instructions(), Some("Prefer search."));
        assert!(vmcp.child("conn_a").is_some());
        assert!(vmcp.child("conn_b").is_none());
        assert_eq!(vmcp.tool_selection_mode, ToolSelectionMode::Inclusion);
    }
}
