//! Shared mutable header snapshots.
//!
//! HTTP-family transports read their auth headers at send time; the auth
//! middleware publishes fresh headers after token refresh. Sharing works by
//! swapping an immutable snapshot behind an atomic pointer per connection
//! id, so a pooled transport observes new headers without being rebuilt.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use once_cell::sync::Lazy;

/// `Authorization` header name
pub const AUTHORIZATION: &str = "authorization";

/// Request id header
pub const X_REQUEST_ID: &str = "x-request-id";

/// Caller connection id header
pub const X_CALLER_ID: &str = "x-caller-id";

/// Mesh-issued JWT header
pub const X_MESH_TOKEN: &str = "x-mesh-token";

/// Headers copied through from request metadata when present
pub const FORWARDABLE_HEADERS: &[&str] =
    &["x-request-id", "traceparent", "tracestate", "user-agent"];

/// Immutable set of headers for one outbound request generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderSnapshot {
    entries: HashMap<String, String>,
}

impl HeaderSnapshot {
    /// An empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from an existing map
    pub fn from_map(entries: HashMap<String, String>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self { entries }
    }

    /// Set a header, replacing any previous value. Names are matched
    /// case-insensitively by lowercasing on insert.
    pub fn set(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Read a header
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Iterate all headers
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of headers
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Builder-style set
    #[must_use]
    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }
}

/// Handle to the current header snapshot of one connection.
///
/// Cloning shares the underlying slot: writers publish whole snapshots,
/// readers load the latest at send time.
#[derive(Debug, Clone, Default)]
pub struct SharedHeaders {
    slot: Arc<ArcSwap<HeaderSnapshot>>,
}

impl SharedHeaders {
    /// Create a handle seeded with `snapshot`
    pub fn new(snapshot: HeaderSnapshot) -> Self {
        Self {
            slot: Arc::new(ArcSwap::from_pointee(snapshot)),
        }
    }

    /// Load the current snapshot
    pub fn load(&self) -> Arc<HeaderSnapshot> {
        self.slot.load_full()
    }

    /// Publish a new snapshot
    pub fn store(&self, snapshot: HeaderSnapshot) {
        self.slot.store(Arc::new(snapshot));
    }
}

/// Registry of header slots keyed by connection id.
#[derive(Debug, Default)]
pub struct HeaderRegistry {
    slots: DashMap<String, SharedHeaders>,
}

static GLOBAL_REGISTRY: Lazy<HeaderRegistry> = Lazy::new(HeaderRegistry::default);

impl HeaderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry
    pub fn global() -> &'static HeaderRegistry {
        &GLOBAL_REGISTRY
    }

    /// The header handle for a connection, created on first use
    pub fn handle(&self, connection_id: &str) -> SharedHeaders {
        self.slots
            .entry(connection_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop a connection's slot
    pub fn remove(&self, connection_id: &str) {
        self.slots.remove(connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_case_insensitive_names() {
        let mut snapshot = HeaderSnapshot::new();
        snapshot.set("Authorization", "Bearer abc");
        assert_eq!(snapshot.get("authorization"), Some("Bearer abc"));
        assert_eq!(snapshot.get("AUTHORIZATION"), Some("Bearer abc"));

        snapshot.set("AUTHORIZATION", "Bearer def");
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("authorization"), Some("Bearer def"));
    }

    #[test]
    fn test_shared_headers_swap_visible_to_clones() {
        let shared = SharedHeaders::new(HeaderSnapshot::new().with(AUTHORIZATION, "Bearer v1"));
        let reader = shared.clone();
        assert_eq!(reader.load().get(AUTHORIZATION), Some("Bearer v1"));

        shared.store(HeaderSnapshot::new().with(AUTHORIZATION, "Bearer v2"));
        assert_eq!(reader.load().get(AUTHORIZATION), Some("Bearer v2"));
    }

    #[test]
    fn test_registry_returns_same_slot() {
        let registry = HeaderRegistry::new();
        let a = registry.handle("conn_a");
        let b = registry.handle("conn_a");
        a.store(HeaderSnapshot::new().with(X_MESH_TOKEN, "jwt"));
        assert_eq!(b.load().get(X_MESH_TOKEN), Some("jwt"));

        registry.remove("conn_a");
        let c = registry.handle("conn_a");
        assert!(c.load().is_empty());
    }
}
