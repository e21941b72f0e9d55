//! Per-request context carried through the gateway.
//!
//! A [`RequestContext`] is created at the upstream edge for every inbound
//! request and threaded down through the aggregator, the outbound client
//! factory and the transport middleware. It carries the request id, the
//! authenticated principal, the caller identity when the caller is itself a
//! connection, and free-form metadata (forwardable headers, monitoring
//! properties).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::id;

/// Authenticated principal attached to a request.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    /// Organization on whose behalf the request runs
    pub organization_id: Option<String>,
    /// End user behind the request, when known
    pub user_id: Option<String>,
    /// Subject claim for mesh-issued tokens
    pub subject: Option<String>,
}

/// Context for a single inbound request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Unique request identifier (`gw_…`)
    pub request_id: String,

    /// Authenticated principal
    pub auth: AuthContext,

    /// Connection id of the caller when the caller is itself a connection
    pub caller_connection_id: Option<String>,

    /// User agent of the upstream caller
    pub user_agent: Option<String>,

    /// Virtual MCP the request is routed through, when any
    pub virtual_mcp_id: Option<String>,

    /// Free-form metadata: forwardable headers, monitoring properties
    pub metadata: Arc<HashMap<String, Value>>,
}

impl RequestContext {
    /// Create a context with a freshly minted request id
    pub fn new() -> Self {
        Self {
            request_id: id::mint_request_id(),
            auth: AuthContext::default(),
            caller_connection_id: None,
            user_agent: None,
            virtual_mcp_id: None,
            metadata: Arc::new(HashMap::new()),
        }
    }

    /// Create a context with an externally supplied request id
    pub fn with_request_id(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            ..Self::new()
        }
    }

    /// Set the authenticated principal
    #[must_use]
    pub fn with_auth(mut self, auth: AuthContext) -> Self {
        self.auth = auth;
        self
    }

    /// Set the organization
    #[must_use]
    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.auth.organization_id = Some(organization_id.into());
        self
    }

    /// Set the end user
    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.auth.user_id = Some(user_id.into());
        self
    }

    /// Mark the caller as a connection
    #[must_use]
    pub fn with_caller_connection(mut self, connection_id: impl Into<String>) -> Self {
        self.caller_connection_id = Some(connection_id.into());
        self
    }

    /// Set the upstream user agent
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// Set the Virtual MCP the request is routed through
    #[must_use]
    pub fn with_virtual_mcp(mut self, virtual_mcp_id: impl Into<String>) -> Self {
        self.virtual_mcp_id = Some(virtual_mcp_id.into());
        self
    }

    /// Add a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut metadata = (*self.metadata).clone();
        metadata.insert(key.into(), value.into());
        self.metadata = Arc::new(metadata);
        self
    }

    /// Read a metadata entry
    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Monitoring properties attached to the request, when any.
    ///
    /// Stored under the `properties` metadata key as a JSON object.
    pub fn properties(&self) -> HashMap<String, Value> {
        match self.metadata.get("properties") {
            Some(Value::Object(map)) => map.clone().into_iter().collect(),
            _ => HashMap::new(),
        }
    }

    /// Organization id, when the principal carries one
    pub fn organization_id(&self) -> Option<&str> {
        self.auth.organization_id.as_deref()
    }

    /// User id, when the principal carries one
    pub fn user_id(&self) -> Option<&str> {
        self.auth.user_id.as_deref()
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}
