//! Single-flight client pool.
//!
//! The pool maps a key (the connection id) to a shared connect future. The
//! future is installed before the connect attempt resolves, so every
//! concurrent caller for the same key awaits the same attempt and observes
//! the same client instance. Failure removes the entry and surfaces the
//! error to all waiters; the next request retries.
//!
//! Two pool instances exist: a process-wide singleton for stdio (child
//! processes must outlive requests) and a per-request pool for the
//! HTTP-family transports, where header freshness matters.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{debug, warn};

use meshmcp_core::{DEFAULT_CONNECT_TIMEOUT_MS, Error, Result};

use crate::client::{Client, CloseHook, ErrorHook};
use crate::service::McpService;

/// Error substrings that mark a pooled client as stale
pub const STALE_ERRORS: &[&str] = &[
    "server not initialized",
    "connection closed",
    "socket hang up",
    "econnreset",
    "econnrefused",
];

/// Whether an error message matches the stale-connection list
pub fn is_stale_error(error: &Error) -> bool {
    let message = error.message.to_lowercase();
    STALE_ERRORS.iter().any(|stale| message.contains(stale))
}

/// Eviction hooks the pool installs on every client it constructs
#[derive(Clone)]
pub struct PoolHooks {
    /// Evicts the key; install as the client's close hook
    pub on_close: CloseHook,
    /// Evicts the key when the error is stale; install as the error hook
    pub on_error: ErrorHook,
}

impl std::fmt::Debug for PoolHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolHooks").finish()
    }
}

type ConnectFuture = Shared<BoxFuture<'static, std::result::Result<Client, Arc<Error>>>>;

/// Pool statistics
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Connect attempts started (first-flight only)
    pub connects_attempted: u64,
    /// Connect attempts that failed or timed out
    pub connects_failed: u64,
    /// Requests served from an existing entry
    pub hits: u64,
    /// Entries evicted by close or stale-error hooks
    pub evictions: u64,
    /// Entries removed by explicit invalidation
    pub invalidations: u64,
}

/// Single-flight cache of live MCP clients keyed by connection id
#[derive(Clone)]
pub struct ClientPool {
    entries: Arc<DashMap<String, ConnectFuture>>,
    connect_timeout: Duration,
    stats: Arc<RwLock<PoolStats>>,
}

impl std::fmt::Debug for ClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPool")
            .field("entries", &self.entries.len())
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl Default for ClientPool {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_STDIO_POOL: Lazy<ClientPool> = Lazy::new(ClientPool::new);

impl ClientPool {
    /// Create an empty pool with the default 30 s connect timeout
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            stats: Arc::new(RwLock::new(PoolStats::default())),
        }
    }

    /// Snapshot the pool statistics
    pub fn stats(&self) -> PoolStats {
        self.stats.read().clone()
    }

    fn update_stats<F>(&self, updater: F)
    where
        F: FnOnce(&mut PoolStats),
    {
        updater(&mut self.stats.write());
    }

    /// The process-wide pool for stdio clients
    pub fn global_stdio() -> &'static ClientPool {
        &GLOBAL_STDIO_POOL
    }

    /// Get the pooled client for `key`, constructing it on first request.
    ///
    /// `connect` receives the eviction hooks to install on the new client
    /// and must resolve to a connected [`Client`]. Exactly one connect is
    /// attempted per key until it succeeds or fails.
    pub async fn get_or_create<F>(&self, key: &str, connect: F) -> Result<Client>
    where
        F: FnOnce(PoolHooks) -> BoxFuture<'static, Result<Client>>,
    {
        let future = match self.entries.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                self.update_stats(|stats| stats.hits += 1);
                entry.get().clone()
            }
            Entry::Vacant(slot) => {
                self.update_stats(|stats| stats.connects_attempted += 1);
                let hooks = self.hooks_for(key);
                let attempt = connect(hooks);
                let entries = self.entries.clone();
                let stats = self.stats.clone();
                let evict_key = key.to_string();
                let timeout = self.connect_timeout;
                let future: ConnectFuture = async move {
                    match tokio::time::timeout(timeout, attempt).await {
                        Ok(Ok(client)) => Ok(client),
                        Ok(Err(error)) => {
                            entries.remove(&evict_key);
                            stats.write().connects_failed += 1;
                            Err(Arc::new(error))
                        }
                        Err(_) => {
                            entries.remove(&evict_key);
                            stats.write().connects_failed += 1;
                            Err(Arc::new(Error::timeout("client connect timed out")))
                        }
                    }
                }
                .boxed()
                .shared();
                slot.insert(future.clone());
                future
            }
        };

        future.await.map_err(|error| (*error).clone())
    }

    fn hooks_for(&self, key: &str) -> PoolHooks {
        let entries = self.entries.clone();
        let stats = self.stats.clone();
        let close_key = key.to_string();
        let on_close: CloseHook = Arc::new(move || {
            debug!(key = %close_key, "Pooled client closed, evicting");
            if entries.remove(&close_key).is_some() {
                stats.write().evictions += 1;
            }
        });

        let entries = self.entries.clone();
        let stats = self.stats.clone();
        let error_key = key.to_string();
        let on_error: ErrorHook = Arc::new(move |error| {
            if is_stale_error(error) {
                debug!(key = %error_key, "Stale connection error, evicting: {error}");
                if entries.remove(&error_key).is_some() {
                    stats.write().evictions += 1;
                }
            }
        });

        PoolHooks { on_close, on_error }
    }

    /// Evict `key` and close the underlying client in the background,
    /// ignoring close errors.
    pub fn invalidate(&self, key: &str) {
        if let Some((_, future)) = self.entries.remove(key) {
            self.update_stats(|stats| stats.invalidations += 1);
            tokio::spawn(async move {
                if let Ok(client) = future.await {
                    if let Err(e) = client.close().await {
                        warn!("Error closing invalidated client: {e}");
                    }
                }
            });
        }
    }

    /// Close every live client in parallel and clear the pool
    pub async fn dispose(&self) {
        let futures: Vec<ConnectFuture> = self
            .entries
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        self.entries.clear();

        let closes = futures.into_iter().map(|future| async move {
            if let Ok(client) = future.await {
                if let Err(e) = client.close().await {
                    warn!("Error closing pooled client: {e}");
                }
            }
        });
        futures::future::join_all(closes).await;
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` currently has a live or in-flight entry
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_error_matching() {
        assert!(is_stale_error(&Error::transport("ECONNRESET by peer")));
        assert!(is_stale_error(&Error::transport("Connection closed")));
        assert!(is_stale_error(&Error::transport("server not initialized")));
        assert!(!is_stale_error(&Error::transport("some other failure")));
        assert!(!is_stale_error(&Error::validation("bad input")));
    }

    #[tokio::test]
    async fn test_failed_connect_is_retried() {
        let pool = ClientPool::new();
        let result = pool
            .get_or_create("conn_x", |_hooks| {
                async { Err(Error::transport("boom")) }.boxed()
            })
            .await;
        assert!(result.is_err());
        // Entry was removed: a later call runs a fresh connect.
        assert!(!pool.contains("conn_x"));

        let stats = pool.stats();
        assert_eq!(stats.connects_attempted, 1);
        assert_eq!(stats.connects_failed, 1);
        assert_eq!(stats.hits, 0);
    }

    #[tokio::test]
    async fn test_invalidate_unknown_key_is_noop() {
        let pool = ClientPool::new();
        pool.invalidate("conn_missing");
        assert!(pool.is_empty());
    }
}
