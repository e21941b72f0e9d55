//! MCP client with request/response correlation.
//!
//! A background pump task owns the transport: outbound requests are queued
//! through a channel, inbound messages are correlated back to their waiting
//! callers by JSON-RPC id. The client handle itself is a cheap `Arc` clone,
//! which is what the pool shares between concurrent requests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use futures::future::Either;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use async_trait::async_trait;

use meshmcp_core::{Error, MessageId, PROTOCOL_VERSION, Result};
use meshmcp_protocol::{
    CallToolRequest, CallToolResult, ClientCapabilities, GetPromptRequest, GetPromptResult,
    Implementation, InitializeRequest, InitializeResult, JsonRpcMessage, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ListPromptsResult, ListResourceTemplatesResult,
    ListResourcesResult, ListToolsResult, Prompt, ReadResourceRequest, ReadResourceResult,
    Resource, ResourceTemplate, Tool, ToolArguments, methods,
};
use meshmcp_transport::{Transport, TransportMessage};

use crate::service::McpService;

/// Callback invoked when the client's transport reaches its terminal close
pub type CloseHook = Arc<dyn Fn() + Send + Sync>;

/// Callback invoked when a transport-level error surfaces
pub type ErrorHook = Arc<dyn Fn(&Error) + Send + Sync>;

/// Options for [`Client::connect`]
#[derive(Clone, Default)]
pub struct ClientOptions {
    /// Client name reported in the handshake; defaults to the gateway name
    pub name: Option<String>,
    /// Invoked once when the connection closes
    pub on_close: Option<CloseHook>,
    /// Invoked for transport-level errors
    pub on_error: Option<ErrorHook>,
}

impl std::fmt::Debug for ClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientOptions")
            .field("name", &self.name)
            .field("on_close", &self.on_close.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

struct Outbound {
    message: TransportMessage,
    ack: oneshot::Sender<Result<()>>,
}

enum PumpCommand {
    Send(Outbound),
    Close,
}

#[derive(Debug)]
struct ClientInner {
    outbound_tx: mpsc::Sender<PumpCommand>,
    pending: DashMap<String, oneshot::Sender<JsonRpcResponse>>,
    next_id: AtomicU64,
    closed: AtomicBool,
    server_info: RwLock<Option<InitializeResult>>,
}

/// MCP client handle; clones share the same connection
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Start the transport, run the initialize handshake and return a
    /// connected client.
    pub async fn connect(mut transport: Box<dyn Transport>, options: ClientOptions) -> Result<Self> {
        transport
            .start()
            .await
            .map_err(|e| Error::transport(e.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::channel::<PumpCommand>(64);
        let inner = Arc::new(ClientInner {
            outbound_tx,
            pending: DashMap::new(),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            server_info: RwLock::new(None),
        });

        tokio::spawn(pump(
            transport,
            outbound_rx,
            inner.clone(),
            options.on_close,
            options.on_error,
        ));

        let client = Self { inner };
        client.initialize(options.name).await?;
        Ok(client)
    }

    async fn initialize(&self, name: Option<String>) -> Result<()> {
        let request = InitializeRequest {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: name.unwrap_or_else(|| meshmcp_core::GATEWAY_NAME.to_string()),
                title: None,
                version: meshmcp_core::GATEWAY_VERSION.to_string(),
            },
        };
        let result: InitializeResult = self
            .request(methods::INITIALIZE, Some(serde_json::to_value(request)?))
            .await?;
        *self.inner.server_info.write() = Some(result);
        self.notify(methods::INITIALIZED, None).await?;
        Ok(())
    }

    /// Server implementation info from the handshake
    pub fn server_info(&self) -> Option<Implementation> {
        self.inner
            .server_info
            .read()
            .as_ref()
            .map(|r| r.server_info.clone())
    }

    /// Whether the connection has reached its terminal close
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    async fn send_message(&self, message: TransportMessage) -> Result<()> {
        if self.is_closed() {
            return Err(Error::transport("connection closed"));
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        self.inner
            .outbound_tx
            .send(PumpCommand::Send(Outbound {
                message,
                ack: ack_tx,
            }))
            .await
            .map_err(|_| Error::transport("connection closed"))?;
        ack_rx
            .await
            .map_err(|_| Error::transport("connection closed"))?
    }

    /// Send a request and await its typed result
    pub async fn request<R: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<R> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) as i64;
        let message_id = MessageId::Number(id);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.insert(message_id.as_key(), tx);

        let request = JsonRpcRequest::new(method, params, message_id.clone());
        let message = TransportMessage::from_json(&request)
            .map_err(|e| Error::serialization(e.to_string()))?;
        if let Err(e) = self.send_message(message).await {
            self.inner.pending.remove(&message_id.as_key());
            return Err(e);
        }

        let response = rx
            .await
            .map_err(|_| Error::transport("connection closed"))?;
        if let Some(error) = response.error {
            return Err(Error::rpc(error.code, error.message));
        }
        let result = response
            .result
            .ok_or_else(|| Error::protocol("response missing result field"))?;
        serde_json::from_value(result).map_err(|e| Error::protocol(format!("invalid response: {e}")))
    }

    /// Send a notification (no response expected)
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        let message = TransportMessage::from_json(&notification)
            .map_err(|e| Error::serialization(e.to_string()))?;
        self.send_message(message).await
    }
}

async fn pump(
    mut transport: Box<dyn Transport>,
    mut outbound_rx: mpsc::Receiver<PumpCommand>,
    inner: Arc<ClientInner>,
    on_close: Option<CloseHook>,
    on_error: Option<ErrorHook>,
) {
    loop {
        // Transport use stays outside the select so the receive borrow ends
        // with the expression.
        let event = tokio::select! {
            outgoing = outbound_rx.recv() => Either::Left(outgoing),
            incoming = transport.receive() => Either::Right(incoming),
        };
        match event {
            Either::Left(Some(PumpCommand::Send(outbound))) => {
                let result = transport
                    .send(outbound.message)
                    .await
                    .map_err(|e| Error::transport(e.to_string()));
                if let Err(ref error) = result {
                    if let Some(hook) = &on_error {
                        hook(error);
                    }
                }
                let _ = outbound.ack.send(result);
            }
            Either::Left(Some(PumpCommand::Close)) | Either::Left(None) => {
                // Explicit close or every handle dropped: shut the transport
                // down.
                let _ = transport.close().await;
                break;
            }
            Either::Right(Ok(Some(message))) => {
                if let Some(reply) = dispatch_incoming(&inner, &message) {
                    if let Err(e) = transport.send(reply).await {
                        warn!("Failed to answer server request: {e}");
                    }
                }
            }
            Either::Right(Ok(None)) => {
                debug!("Transport closed");
                break;
            }
            Either::Right(Err(e)) => {
                let error = Error::transport(e.to_string());
                if let Some(hook) = &on_error {
                    hook(&error);
                }
                break;
            }
        }
    }

    inner.closed.store(true, Ordering::SeqCst);
    // Every in-flight request fails with the same terminal error.
    let keys: Vec<String> = inner.pending.iter().map(|e| e.key().clone()).collect();
    for key in keys {
        inner.pending.remove(&key);
    }
    if let Some(hook) = on_close {
        hook();
    }
}

/// Handle an inbound message; returns a reply to send when the server
/// initiated a request we answer (currently only `ping`).
fn dispatch_incoming(
    inner: &Arc<ClientInner>,
    message: &TransportMessage,
) -> Option<TransportMessage> {
    match message.parse() {
        Ok(JsonRpcMessage::Response(response)) => {
            let Some(id) = response.id.clone() else {
                warn!("Response without id, dropping");
                return None;
            };
            match inner.pending.remove(&id.as_key()) {
                Some((_, tx)) => {
                    let _ = tx.send(response);
                }
                None => debug!(id = %id, "Response for unknown request"),
            }
            None
        }
        Ok(JsonRpcMessage::Notification(notification)) => {
            debug!(method = %notification.method, "Ignoring server notification");
            None
        }
        Ok(JsonRpcMessage::Request(request)) => {
            if request.method == methods::PING {
                let pong = JsonRpcResponse::success(serde_json::json!({}), request.id);
                return TransportMessage::from_json(&pong).ok();
            }
            debug!(method = %request.method, "Ignoring server-initiated request");
            None
        }
        Err(e) => {
            warn!("Unparseable inbound message: {e}");
            None
        }
    }
}

#[async_trait]
impl McpService for Client {
    async fn list_tools(&self) -> Result<Vec<Tool>> {
        let result: ListToolsResult = self.request(methods::TOOLS_LIST, None).await?;
        Ok(result.tools)
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: Option<ToolArguments>,
    ) -> Result<CallToolResult> {
        let request = CallToolRequest {
            name: name.to_string(),
            arguments,
            meta: None,
        };
        self.request(methods::TOOLS_CALL, Some(serde_json::to_value(request)?))
            .await
    }

    async fn list_resources(&self) -> Result<Vec<Resource>> {
        let result: ListResourcesResult = self.request(methods::RESOURCES_LIST, None).await?;
        Ok(result.resources)
    }

    async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>> {
        let result: ListResourceTemplatesResult = self
            .request(methods::RESOURCES_TEMPLATES_LIST, None)
            .await?;
        Ok(result.resource_templates)
    }

    async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult> {
        let request = ReadResourceRequest {
            uri: uri.to_string(),
        };
        self.request(methods::RESOURCES_READ, Some(serde_json::to_value(request)?))
            .await
    }

    async fn list_prompts(&self) -> Result<Vec<Prompt>> {
        let result: ListPromptsResult = self.request(methods::PROMPTS_LIST, None).await?;
        Ok(result.prompts)
    }

    async fn get_prompt(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<GetPromptResult> {
        let request = GetPromptRequest {
            name: name.to_string(),
            arguments,
        };
        self.request(methods::PROMPTS_GET, Some(serde_json::to_value(request)?))
            .await
    }

    fn instructions(&self) -> Option<String> {
        self.inner
            .server_info
            .read()
            .as_ref()
            .and_then(|r| r.instructions.clone())
    }

    async fn ping(&self) -> Result<()> {
        let _: HashMap<String, Value> = self.request(methods::PING, None).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        // The pump closes the transport and fails anything still pending.
        let _ = self.inner.outbound_tx.send(PumpCommand::Close).await;
        Ok(())
    }
}
