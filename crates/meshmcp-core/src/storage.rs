//! Storage interfaces consumed by the gateway.
//!
//! The mesh platform owns the actual tables; the gateway reads and writes
//! through these traits. [`InMemoryStorage`] backs tests and dev mode.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::model::{Connection, DownstreamToken, VirtualMcp};

/// One completed tool call, persisted by the monitoring sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Audit record id (`audit_…`)
    pub id: String,
    /// Organization the call ran under
    pub organization_id: String,
    /// Connection that served the call
    pub connection_id: String,
    /// Connection title at call time
    pub connection_title: String,
    /// Tool name as sent downstream
    pub tool_name: String,
    /// Call arguments
    pub input: Value,
    /// Call result
    pub output: Value,
    /// Whether the call failed
    pub is_error: bool,
    /// Error message when failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Round-trip duration in milliseconds
    pub duration_ms: u64,
    /// Completion instant
    pub timestamp: DateTime<Utc>,
    /// End user behind the call, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Request id the call belonged to
    pub request_id: String,
    /// Upstream user agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// Virtual MCP the call was routed through
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtual_mcp_id: Option<String>,
    /// Merged request-metadata and `_meta` properties
    #[serde(default)]
    pub properties: HashMap<String, Value>,
}

/// Read access to connection records.
#[async_trait]
pub trait ConnectionStore: Send + Sync + fmt::Debug {
    /// List all connections of an organization
    async fn list(&self, organization_id: &str) -> Result<Vec<Connection>>;

    /// Find a connection by id
    async fn find_by_id(&self, id: &str) -> Result<Option<Connection>>;
}

/// Read access to Virtual MCP records.
#[async_trait]
pub trait VirtualMcpStore: Send + Sync + fmt::Debug {
    /// Find a Virtual MCP by id, optionally scoped to an organization
    async fn find_by_id(&self, id: &str, organization_id: Option<&str>)
    -> Result<Option<VirtualMcp>>;

    /// List the Virtual MCPs of an organization that name a connection
    async fn list_by_connection_id(
        &self,
        organization_id: &str,
        connection_id: &str,
    ) -> Result<Vec<VirtualMcp>>;
}

/// Write access for monitoring records. Fire-and-forget contract: callers
/// never propagate failures from `log`.
#[async_trait]
pub trait MonitoringStore: Send + Sync + fmt::Debug {
    /// Persist one tool-call record
    async fn log(&self, record: ToolCallRecord) -> Result<()>;
}

/// Read/write access to downstream OAuth tokens.
#[async_trait]
pub trait DownstreamTokenStore: Send + Sync + fmt::Debug {
    /// Look up the token for a connection (and user, when per-user)
    async fn get(
        &self,
        connection_id: &str,
        user_id: Option<&str>,
    ) -> Result<Option<DownstreamToken>>;

    /// Insert or replace a token
    async fn upsert(&self, token: DownstreamToken) -> Result<()>;

    /// Remove a token
    async fn delete(&self, connection_id: &str, user_id: Option<&str>) -> Result<()>;
}

/// Bundle of the storage interfaces the gateway consumes.
#[derive(Debug, Clone)]
pub struct Storage {
    /// Connection records
    pub connections: Arc<dyn ConnectionStore>,
    /// Virtual MCP records
    pub virtual_mcps: Arc<dyn VirtualMcpStore>,
    /// Monitoring records
    pub monitoring: Arc<dyn MonitoringStore>,
    /// Downstream tokens
    pub downstream_tokens: Arc<dyn DownstreamTokenStore>,
}

impl Storage {
    /// A storage bundle backed entirely by [`InMemoryStorage`]
    pub fn in_memory() -> (Self, Arc<InMemoryStorage>) {
        let memory = Arc::new(InMemoryStorage::new());
        let storage = Self {
            connections: memory.clone(),
            virtual_mcps: memory.clone(),
            monitoring: memory.clone(),
            downstream_tokens: memory.clone(),
        };
        (storage, memory)
    }
}

fn token_key(connection_id: &str, user_id: Option<&str>) -> String {
    match user_id {
        Some(user) => format!("{connection_id}\u{1}{user}"),
        None => connection_id.to_string(),
    }
}

/// Map-backed storage used by tests and dev mode.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    connections: RwLock<HashMap<String, Connection>>,
    virtual_mcps: RwLock<HashMap<String, VirtualMcp>>,
    records: RwLock<Vec<ToolCallRecord>>,
    tokens: RwLock<HashMap<String, DownstreamToken>>,
}

impl InMemoryStorage {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a connection
    pub fn put_connection(&self, connection: Connection) {
        self.connections
            .write()
            .insert(connection.id.clone(), connection);
    }

    /// Insert or replace a Virtual MCP
    pub fn put_virtual_mcp(&self, vmcp: VirtualMcp) {
        self.virtual_mcps.write().insert(vmcp.id.clone(), vmcp);
    }

    /// All monitoring records written so far
    pub fn records(&self) -> Vec<ToolCallRecord> {
        self.records.read().clone()
    }

    /// Current token for a connection, bypassing expiry logic
    pub fn token(&self, connection_id: &str, user_id: Option<&str>) -> Option<DownstreamToken> {
        self.tokens.read().get(&token_key(connection_id, user_id)).cloned()
    }
}

#[async_trait]
impl ConnectionStore for InMemoryStorage {
    async fn list(&self, organization_id: &str) -> Result<Vec<Connection>> {
        let mut connections: Vec<Connection> = self
            .connections
            .read()
            .values()
            .filter(|c| c.organization_id == organization_id)
            .cloned()
            .collect();
        connections.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(connections)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Connection>> {
        Ok(self.connections.read().get(id).cloned())
    }
}

#[async_trait]
impl VirtualMcpStore for InMemoryStorage {
    async fn find_by_id(
        &self,
        id: &str,
        organization_id: Option<&str>,
    ) -> Result<Option<VirtualMcp>> {
        let found = self.virtual_mcps.read().get(id).cloned();
        Ok(found.filter(|v| organization_id.map_or(true, |org| v.organization_id == org)))
    }

    async fn list_by_connection_id(
        &self,
        organization_id: &str,
        connection_id: &str,
    ) -> Result<Vec<VirtualMcp>> {
        let mut found: Vec<VirtualMcp> = self
            .virtual_mcps
            .read()
            .values()
            .filter(|v| {
                v.organization_id == organization_id && v.child(connection_id).is_some()
            })
            .cloned()
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }
}

#[async_trait]
impl MonitoringStore for InMemoryStorage {
    async fn log(&self, record: ToolCallRecord) -> Result<()> {
        self.records.write().push(record);
        Ok(())
    }
}

#[async_trait]
impl DownstreamTokenStore for InMemoryStorage {
    async fn get(
        &self,
        connection_id: &str,
        user_id: Option<&str>,
    ) -> Result<Option<DownstreamToken>> {
        Ok(self
            .tokens
            .read()
            .get(&token_key(connection_id, user_id))
            .cloned())
    }

    async fn upsert(&self, token: DownstreamToken) -> Result<()> {
        let key = token_key(&token.connection_id, token.user_id.as_deref());
        self.tokens.write().insert(key, token);
        Ok(())
    }

    async fn delete(&self, connection_id: &str, user_id: Option<&str>) -> Result<()> {
        self.tokens.write().remove(&token_key(connection_id, user_id));
        Ok(())
    }
}
