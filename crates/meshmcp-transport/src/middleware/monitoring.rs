//! Monitoring middleware: per-tool-call metrics, spans and audit records.
//!
//! Tracks in-flight `tools/call` requests by JSON-RPC id. The matching
//! response closes the span, emits a duration histogram and a counter, and
//! writes a structured record through the monitoring store. Storage write
//! failures never reach the caller. When the transport closes with calls
//! still in flight, their spans end with `transport.closed = true` and no
//! histogram sample is recorded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::{Span, debug, info_span, warn};

use meshmcp_core::context::RequestContext;
use meshmcp_core::id;
use meshmcp_core::storage::{MonitoringStore, ToolCallRecord};
use meshmcp_protocol::{CallToolRequest, CallToolResult, JsonRpcMessage, JsonRpcResponse, methods};

use crate::core::{Transport, TransportKind, TransportMessage, TransportResult};

/// Histogram of tool-call round trips in milliseconds
pub const METRIC_TOOL_CALL_DURATION: &str = "meshmcp_tool_call_duration_milliseconds";

/// Counter of completed tool calls, tagged by status
pub const METRIC_TOOL_CALLS: &str = "meshmcp_tool_calls_total";

/// Counter of tool calls aborted by transport close
pub const METRIC_TOOL_CALLS_ABORTED: &str = "meshmcp_tool_calls_aborted_total";

/// Identity and attribution for the monitored connection.
#[derive(Debug, Clone)]
pub struct MonitoringContext {
    /// Connection served by the wrapped transport
    pub connection_id: String,
    /// Connection title at construction time
    pub connection_title: String,
    /// Organization attribution; records are skipped without one
    pub organization_id: Option<String>,
    /// Request the transport serves
    pub request_id: String,
    /// End user behind the request
    pub user_id: Option<String>,
    /// Upstream user agent
    pub user_agent: Option<String>,
    /// Virtual MCP the call is routed through
    pub virtual_mcp_id: Option<String>,
    /// Request-metadata properties merged into every record
    pub properties: HashMap<String, Value>,
    /// Whether records are written to storage; metrics emit regardless
    pub monitoring_enabled: bool,
}

impl MonitoringContext {
    /// Build a context for one connection under one request
    pub fn new(
        connection_id: impl Into<String>,
        connection_title: impl Into<String>,
        ctx: &RequestContext,
        monitoring_enabled: bool,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            connection_title: connection_title.into(),
            organization_id: ctx.organization_id().map(String::from),
            request_id: ctx.request_id.clone(),
            user_id: ctx.user_id().map(String::from),
            user_agent: ctx.user_agent.clone(),
            virtual_mcp_id: ctx.virtual_mcp_id.clone(),
            properties: ctx.properties(),
            monitoring_enabled,
        }
    }
}

#[derive(Debug)]
struct InflightCall {
    tool_name: String,
    input: Value,
    meta: Option<serde_json::Map<String, Value>>,
    started: Instant,
    span: Span,
}

/// Transport wrapper that records tool-call round trips
#[derive(Debug)]
pub struct MonitoringTransport {
    inner: Box<dyn Transport>,
    ctx: MonitoringContext,
    sink: Option<Arc<dyn MonitoringStore>>,
    inflight: DashMap<String, InflightCall>,
}

impl MonitoringTransport {
    /// Wrap `inner`, writing records through `sink` when one is given
    pub fn new(
        inner: Box<dyn Transport>,
        ctx: MonitoringContext,
        sink: Option<Arc<dyn MonitoringStore>>,
    ) -> Self {
        Self {
            inner,
            ctx,
            sink,
            inflight: DashMap::new(),
        }
    }

    fn observe_request(&self, message: &TransportMessage) {
        let Ok(JsonRpcMessage::Request(request)) = message.parse() else {
            return;
        };
        if request.method != methods::TOOLS_CALL {
            return;
        }
        let call: CallToolRequest = match request
            .params
            .clone()
            .map(serde_json::from_value)
            .transpose()
        {
            Ok(Some(call)) => call,
            _ => return,
        };

        let span = info_span!(
            "mcp.tool_call",
            request_id = %self.ctx.request_id,
            connection_id = %self.ctx.connection_id,
            tool = %call.name,
            error_code = tracing::field::Empty,
            error_message = tracing::field::Empty,
            transport_closed = tracing::field::Empty,
        );

        self.inflight.insert(
            request.id.as_key(),
            InflightCall {
                tool_name: call.name,
                input: serde_json::to_value(call.arguments.unwrap_or_default())
                    .unwrap_or(Value::Null),
                meta: call.meta,
                started: Instant::now(),
                span,
            },
        );
    }

    fn observe_response(&self, message: &TransportMessage) {
        let Ok(JsonRpcMessage::Response(response)) = message.parse() else {
            return;
        };
        let Some(id) = response.id.as_ref() else {
            return;
        };
        let Some((_, call)) = self.inflight.remove(&id.as_key()) else {
            return;
        };

        let duration_ms = call.started.elapsed().as_millis() as u64;
        let (is_error, error_message, output) = classify_response(&response);

        let status = if is_error { "error" } else { "ok" };
        histogram!(
            METRIC_TOOL_CALL_DURATION,
            "connection_id" => self.ctx.connection_id.clone(),
            "tool" => call.tool_name.clone(),
            "status" => status
        )
        .record(duration_ms as f64);
        counter!(
            METRIC_TOOL_CALLS,
            "connection_id" => self.ctx.connection_id.clone(),
            "status" => status
        )
        .increment(1);

        if let Some(error) = &response.error {
            call.span.record("error_code", error.code);
            call.span.record("error_message", error.message.as_str());
        } else if let Some(message) = &error_message {
            call.span.record("error_message", message.as_str());
        }
        drop(call.span);

        let Some(sink) = self.sink.clone() else {
            return;
        };
        if !self.ctx.monitoring_enabled {
            return;
        }
        let Some(organization_id) = self.ctx.organization_id.clone() else {
            return;
        };

        let mut properties = self.ctx.properties.clone();
        if let Some(meta) = call.meta {
            properties.extend(meta);
        }

        let record = ToolCallRecord {
            id: id::mint_audit_id(),
            organization_id,
            connection_id: self.ctx.connection_id.clone(),
            connection_title: self.ctx.connection_title.clone(),
            tool_name: call.tool_name,
            input: call.input,
            output,
            is_error,
            error_message,
            duration_ms,
            timestamp: Utc::now(),
            user_id: self.ctx.user_id.clone(),
            request_id: self.ctx.request_id.clone(),
            user_agent: self.ctx.user_agent.clone(),
            virtual_mcp_id: self.ctx.virtual_mcp_id.clone(),
            properties,
        };

        tokio::spawn(async move {
            if let Err(e) = sink.log(record).await {
                warn!("Monitoring record write failed: {e}");
            }
        });
    }

    fn abort_inflight(&self) {
        let keys: Vec<String> = self.inflight.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, call)) = self.inflight.remove(&key) {
                call.span.record("transport_closed", true);
                debug!(tool = %call.tool_name, "Transport closed with call in flight");
                counter!(
                    METRIC_TOOL_CALLS_ABORTED,
                    "connection_id" => self.ctx.connection_id.clone()
                )
                .increment(1);
                drop(call.span);
            }
        }
    }
}

/// Extract failure state and raw output from a tool-call response.
fn classify_response(response: &JsonRpcResponse) -> (bool, Option<String>, Value) {
    if let Some(error) = &response.error {
        return (
            true,
            Some(error.message.clone()),
            serde_json::to_value(error).unwrap_or(Value::Null),
        );
    }
    let output = response.result.clone().unwrap_or(Value::Null);
    if let Ok(result) = serde_json::from_value::<CallToolResult>(output.clone()) {
        if result.failed() {
            let message = result
                .content
                .first()
                .and_then(|c| c.as_text())
                .map(String::from);
            return (true, message, output);
        }
    }
    (false, None, output)
}

#[async_trait]
impl Transport for MonitoringTransport {
    fn kind(&self) -> TransportKind {
        self.inner.kind()
    }

    async fn start(&mut self) -> TransportResult<()> {
        self.inner.start().await
    }

    async fn send(&mut self, message: TransportMessage) -> TransportResult<()> {
        self.observe_request(&message);
        self.inner.send(message).await
    }

    async fn receive(&mut self) -> TransportResult<Option<TransportMessage>> {
        match self.inner.receive().await {
            Ok(Some(message)) => {
                self.observe_response(&message);
                Ok(Some(message))
            }
            Ok(None) => {
                self.abort_inflight();
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn close(&mut self) -> TransportResult<()> {
        self.abort_inflight();
        self.inner.close().await
    }

    fn endpoint(&self) -> Option<String> {
        self.inner.endpoint()
    }

    fn supports_streaming(&self) -> bool {
        self.inner.supports_streaming()
    }
}
