//! Outbound client factory.
//!
//! Picks the transport from the connection type, composes the auth and
//! monitoring middleware around it, and resolves the client through the
//! appropriate pool: the process-wide pool for stdio, the per-request pool
//! for the HTTP family. Virtual connections delegate to the bridge through
//! an injected resolver.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use meshmcp_core::context::RequestContext;
use meshmcp_core::model::{Connection, ConnectionType};
use meshmcp_core::storage::{DownstreamTokenStore, MonitoringStore};
use meshmcp_core::{Error, MeshConfig, Result};
use meshmcp_transport::middleware::{AuthTransport, MonitoringContext, MonitoringTransport};
use meshmcp_transport::stdio::{StdioConfig, StdioTransport};
use meshmcp_transport::{
    HeaderRegistry, HttpConfig, HttpTransport, SseConfig, SseTransport, Transport,
    WebSocketConfig, WebSocketTransport,
};

use crate::auth::HeaderBuilder;
use crate::client::{Client, ClientOptions};
use crate::pool::{ClientPool, PoolHooks};

/// Opens clients for `VIRTUAL` connections; implemented by the Virtual MCP
/// bridge.
#[async_trait]
pub trait VirtualClientResolver: Send + Sync + fmt::Debug {
    /// Resolve the connection's Virtual MCP and open a client for it
    async fn open(&self, connection: &Connection, ctx: &RequestContext) -> Result<Client>;
}

/// Builds pooled outbound clients for connections.
#[derive(Clone)]
pub struct ClientFactory {
    config: MeshConfig,
    tokens: Arc<dyn DownstreamTokenStore>,
    monitoring: Arc<dyn MonitoringStore>,
    virtual_resolver: Option<Arc<dyn VirtualClientResolver>>,
}

impl fmt::Debug for ClientFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientFactory")
            .field("production", &self.config.production)
            .field("has_virtual_resolver", &self.virtual_resolver.is_some())
            .finish()
    }
}

impl ClientFactory {
    /// Create a factory
    pub fn new(
        config: MeshConfig,
        tokens: Arc<dyn DownstreamTokenStore>,
        monitoring: Arc<dyn MonitoringStore>,
    ) -> Self {
        Self {
            config,
            tokens,
            monitoring,
            virtual_resolver: None,
        }
    }

    /// Install the resolver for `VIRTUAL` connections
    #[must_use]
    pub fn with_virtual_resolver(mut self, resolver: Arc<dyn VirtualClientResolver>) -> Self {
        self.virtual_resolver = Some(resolver);
        self
    }

    /// Obtain a pooled client for `connection`.
    ///
    /// The factory never owns the client lifecycle; eviction and close are
    /// the pool's business.
    pub async fn client_for(
        &self,
        connection: &Connection,
        ctx: &RequestContext,
        request_pool: &ClientPool,
    ) -> Result<Client> {
        match connection.connection_type {
            ConnectionType::Virtual => {
                let resolver = self
                    .virtual_resolver
                    .as_ref()
                    .ok_or_else(|| Error::configuration("no virtual MCP resolver installed"))?;
                resolver.open(connection, ctx).await
            }
            ConnectionType::Stdio => self.stdio_client(connection, ctx).await,
            ConnectionType::Http | ConnectionType::Sse | ConnectionType::Websocket => {
                self.http_family_client(connection, ctx, request_pool).await
            }
        }
    }

    async fn stdio_client(&self, connection: &Connection, ctx: &RequestContext) -> Result<Client> {
        // Refuse before pooling so no child process is ever spawned.
        if !self.config.stdio_allowed() {
            return Err(Error::configuration(
                "stdio transport is disallowed in production (set UNSAFE_ALLOW_STDIO_TRANSPORT=true to override)",
            ));
        }
        let spec = connection
            .stdio
            .clone()
            .ok_or_else(|| Error::validation("stdio connection has no launch spec"))?;

        let stdio_config = StdioConfig::from_command(connection.id.clone(), &spec);
        let mesh_config = self.config.clone();
        let monitoring_ctx = MonitoringContext::new(
            connection.id.clone(),
            connection.title.clone(),
            ctx,
            self.config.monitoring_enabled,
        );
        let sink = self.monitoring.clone();

        ClientPool::global_stdio()
            .get_or_create(&connection.id, move |hooks| {
                async move {
                    let base = StdioTransport::new(stdio_config, &mesh_config)
                        .map_err(|e| Error::configuration(e.to_string()))?;
                    let transport =
                        MonitoringTransport::new(Box::new(base), monitoring_ctx, Some(sink));
                    connect_with_hooks(Box::new(transport), hooks).await
                }
                .boxed()
            })
            .await
    }

    async fn http_family_client(
        &self,
        connection: &Connection,
        ctx: &RequestContext,
        request_pool: &ClientPool,
    ) -> Result<Client> {
        let url = connection
            .connection_url
            .clone()
            .ok_or_else(|| Error::validation("connection has no url"))?;

        let headers = HeaderRegistry::global().handle(&connection.id);
        let source = Arc::new(HeaderBuilder::new(
            connection.clone(),
            ctx.clone(),
            self.config.clone(),
            self.tokens.clone(),
        ));
        let monitoring_ctx = MonitoringContext::new(
            connection.id.clone(),
            connection.title.clone(),
            ctx,
            self.config.monitoring_enabled,
        );
        let sink = self.monitoring.clone();
        let connection_type = connection.connection_type;

        request_pool
            .get_or_create(&connection.id, move |hooks| {
                async move {
                    let base: Box<dyn Transport> = match connection_type {
                        ConnectionType::Http => {
                            Box::new(HttpTransport::new(HttpConfig::new(url, headers.clone())))
                        }
                        ConnectionType::Sse => {
                            Box::new(SseTransport::new(SseConfig::new(url, headers.clone())))
                        }
                        ConnectionType::Websocket => Box::new(WebSocketTransport::new(
                            WebSocketConfig::new(url, headers.clone()),
                        )),
                        _ => unreachable!("http-family dispatch"),
                    };
                    let auth = AuthTransport::new(base, source, headers);
                    let transport =
                        MonitoringTransport::new(Box::new(auth), monitoring_ctx, Some(sink));
                    connect_with_hooks(Box::new(transport), hooks).await
                }
                .boxed()
            })
            .await
    }
}

async fn connect_with_hooks(transport: Box<dyn Transport>, hooks: PoolHooks) -> Result<Client> {
    Client::connect(
        transport,
        ClientOptions {
            name: None,
            on_close: Some(hooks.on_close),
            on_error: Some(hooks.on_error),
        },
    )
    .await
}
