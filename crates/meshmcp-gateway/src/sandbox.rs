//! Bounded script execution against the aggregated tool surface.
//!
//! User code runs as a Rhai script on a blocking thread; the value of the
//! script's final expression becomes the return value. The only capability
//! in scope is a `tools` object whose `call(name, args)` bridges into the
//! aggregator over a channel. Wall-clock enforcement is two-layered: a
//! deadline progress callback aborts the script from inside the engine, and
//! a timeout around the whole run cancels any tool calls still pending.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rhai::{Dynamic, Engine, EvalAltResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use meshmcp_client::McpService;
use meshmcp_protocol::CallToolResult;

/// Default script timeout
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

/// Error string reported when the script exceeds its budget
pub const TIMEOUT_ERROR: &str = "timeout";

/// One captured console line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsoleLog {
    /// `log` for print output, `debug` for debug output
    #[serde(rename = "type")]
    pub level: String,
    /// The printed text
    pub content: String,
}

/// Outcome of one sandbox run
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SandboxResult {
    /// Value of the script's final expression, when it completed
    #[serde(rename = "returnValue", skip_serializing_if = "Option::is_none")]
    pub return_value: Option<Value>,
    /// Failure description, `"timeout"` on budget overrun
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Captured print/debug output in emission order
    #[serde(rename = "consoleLogs")]
    pub console_logs: Vec<ConsoleLog>,
}

struct BridgeRequest {
    tool: String,
    arguments: Value,
    reply: oneshot::Sender<std::result::Result<Value, String>>,
}

/// Handle passed into scripts as `tools`
#[derive(Clone)]
struct ToolsProxy {
    bridge: mpsc::UnboundedSender<BridgeRequest>,
}

impl ToolsProxy {
    fn call_value(&self, tool: &str, arguments: Value) -> std::result::Result<Value, String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.bridge
            .send(BridgeRequest {
                tool: tool.to_string(),
                arguments,
                reply: reply_tx,
            })
            .map_err(|_| TIMEOUT_ERROR.to_string())?;
        reply_rx
            .blocking_recv()
            .map_err(|_| TIMEOUT_ERROR.to_string())?
    }
}

/// Unwrap an MCP tool result into a plain script value: prefer
/// `structuredContent`, else the first text block parsed as JSON, else the
/// raw text, else the whole result object.
fn unwrap_tool_result(result: &CallToolResult) -> Value {
    if let Some(structured) = &result.structured_content {
        return structured.clone();
    }
    if let Some(text) = result.content.first().and_then(|c| c.as_text()) {
        if let Ok(parsed) = serde_json::from_str::<Value>(text) {
            return parsed;
        }
        return Value::String(text.to_string());
    }
    serde_json::to_value(result).unwrap_or(Value::Null)
}

/// Sandboxed script runner
#[derive(Debug, Clone, Default)]
pub struct Sandbox;

impl Sandbox {
    /// Create a sandbox
    pub fn new() -> Self {
        Self
    }

    /// Run `code` against `tools` with the given wall-clock budget.
    pub async fn run_code(
        &self,
        code: &str,
        timeout: Duration,
        tools: Arc<dyn McpService>,
    ) -> SandboxResult {
        let (bridge_tx, mut bridge_rx) = mpsc::unbounded_channel::<BridgeRequest>();
        let cancel = CancellationToken::new();

        // Bridge task: serializes tool calls from the script thread into the
        // async aggregator, answering with unwrapped values.
        let bridge_cancel = cancel.clone();
        let bridge = tokio::spawn(async move {
            loop {
                let request = tokio::select! {
                    request = bridge_rx.recv() => request,
                    () = bridge_cancel.cancelled() => break,
                };
                let Some(request) = request else { break };

                let arguments = match request.arguments {
                    Value::Object(map) => Some(map),
                    Value::Null => None,
                    other => {
                        let _ = request
                            .reply
                            .send(Err(format!("tool arguments must be an object, got {other}")));
                        continue;
                    }
                };
                let outcome = tokio::select! {
                    outcome = tools.call_tool(&request.tool, arguments) => outcome,
                    () = bridge_cancel.cancelled() => {
                        let _ = request.reply.send(Err(TIMEOUT_ERROR.to_string()));
                        break;
                    }
                };
                let reply = match outcome {
                    Ok(result) if result.failed() => Err(result
                        .content
                        .first()
                        .and_then(|c| c.as_text())
                        .unwrap_or("tool call failed")
                        .to_string()),
                    Ok(result) => Ok(unwrap_tool_result(&result)),
                    Err(error) => Err(error.to_string()),
                };
                let _ = request.reply.send(reply);
            }
        });

        let logs: Arc<Mutex<Vec<ConsoleLog>>> = Arc::new(Mutex::new(Vec::new()));
        let script = code.to_string();
        let proxy = ToolsProxy { bridge: bridge_tx };
        let deadline = Instant::now() + timeout;
        let script_logs = logs.clone();

        let run = tokio::task::spawn_blocking(move || {
            let mut engine = Engine::new();
            // The tool table is the only capability: no filesystem, network,
            // environment or timer registrations exist on this engine.
            engine.on_progress(move |_| {
                if Instant::now() >= deadline {
                    Some(Dynamic::from(TIMEOUT_ERROR))
                } else {
                    None
                }
            });
            let print_logs = script_logs.clone();
            engine.on_print(move |text| {
                print_logs.lock().push(ConsoleLog {
                    level: "log".to_string(),
                    content: text.to_string(),
                });
            });
            let debug_logs = script_logs.clone();
            engine.on_debug(move |text, _, _| {
                debug_logs.lock().push(ConsoleLog {
                    level: "debug".to_string(),
                    content: text.to_string(),
                });
            });

            engine
                .register_type_with_name::<ToolsProxy>("Tools")
                .register_fn(
                    "call",
                    |proxy: &mut ToolsProxy,
                     name: &str,
                     args: rhai::Map|
                     -> std::result::Result<Dynamic, Box<EvalAltResult>> {
                        let arguments = rhai::serde::from_dynamic::<Value>(&Dynamic::from(args))
                            .map_err(|e| e.to_string())?;
                        let value = proxy.call_value(name, arguments).map_err(|e| {
                            Box::new(EvalAltResult::ErrorRuntime(
                                Dynamic::from(e),
                                rhai::Position::NONE,
                            ))
                        })?;
                        rhai::serde::to_dynamic(value).map_err(|e| e.to_string().into())
                    },
                )
                .register_fn(
                    "call",
                    |proxy: &mut ToolsProxy,
                     name: &str|
                     -> std::result::Result<Dynamic, Box<EvalAltResult>> {
                        let value = proxy.call_value(name, Value::Null).map_err(|e| {
                            Box::new(EvalAltResult::ErrorRuntime(
                                Dynamic::from(e),
                                rhai::Position::NONE,
                            ))
                        })?;
                        rhai::serde::to_dynamic(value).map_err(|e| e.to_string().into())
                    },
                );

            let mut scope = rhai::Scope::new();
            scope.push("tools", proxy);
            engine.eval_with_scope::<Dynamic>(&mut scope, &script)
        });

        let outcome = tokio::time::timeout(timeout + Duration::from_millis(50), run).await;
        // Whatever happened, nothing started from the script may keep
        // running: cancel pending bridged calls.
        cancel.cancel();
        let _ = bridge.await;

        let console_logs = logs.lock().clone();
        match outcome {
            Err(_) => SandboxResult {
                return_value: None,
                error: Some(TIMEOUT_ERROR.to_string()),
                console_logs,
            },
            Ok(Err(join_error)) => SandboxResult {
                return_value: None,
                error: Some(format!("script panicked: {join_error}")),
                console_logs,
            },
            Ok(Ok(Err(eval_error))) => {
                let message = match *eval_error {
                    EvalAltResult::ErrorTerminated(token, _) => {
                        debug!("Script terminated by deadline");
                        token.to_string()
                    }
                    other => other.to_string(),
                };
                SandboxResult {
                    return_value: None,
                    error: Some(message),
                    console_logs,
                }
            }
            Ok(Ok(Ok(value))) => {
                let return_value = if value.is_unit() {
                    None
                } else {
                    rhai::serde::from_dynamic::<Value>(&value).ok()
                };
                SandboxResult {
                    return_value,
                    error: None,
                    console_logs,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meshmcp_core::Result;
    use meshmcp_protocol::{
        GetPromptResult, Prompt, ReadResourceResult, Resource, ResourceTemplate, Tool,
        ToolArguments,
    };
    use serde_json::{Map, json};

    #[derive(Debug)]
    struct FakeTools;

    #[async_trait]
    impl McpService for FakeTools {
        async fn list_tools(&self) -> Result<Vec<Tool>> {
            Ok(Vec::new())
        }

        async fn call_tool(
            &self,
            name: &str,
            arguments: Option<ToolArguments>,
        ) -> Result<CallToolResult> {
            match name {
                "add" => {
                    let args = arguments.unwrap_or_default();
                    let a = args.get("a").and_then(Value::as_i64).unwrap_or(0);
                    let b = args.get("b").and_then(Value::as_i64).unwrap_or(0);
                    Ok(CallToolResult {
                        content: vec![meshmcp_protocol::ContentBlock::text("ignored")],
                        structured_content: Some(json!({"sum": a + b})),
                        is_error: None,
                    })
                }
                "text_json" => Ok(CallToolResult::text(r#"{"ok": true}"#)),
                "plain_text" => Ok(CallToolResult::text("just words")),
                "slow" => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(CallToolResult::text("too late"))
                }
                other => Ok(CallToolResult::error(format!("Tool not found: {other}"))),
            }
        }

        async fn list_resources(&self) -> Result<Vec<Resource>> {
            Ok(Vec::new())
        }

        async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>> {
            Ok(Vec::new())
        }

        async fn read_resource(&self, _uri: &str) -> Result<ReadResourceResult> {
            Err(meshmcp_core::Error::not_found("no resources"))
        }

        async fn list_prompts(&self) -> Result<Vec<Prompt>> {
            Ok(Vec::new())
        }

        async fn get_prompt(
            &self,
            _name: &str,
            _arguments: Option<Map<String, Value>>,
        ) -> Result<GetPromptResult> {
            Err(meshmcp_core::Error::not_found("no prompts"))
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn tools() -> Arc<dyn McpService> {
        Arc::new(FakeTools)
    }

    #[tokio::test]
    async fn test_return_value_from_final_expression() {
        let sandbox = Sandbox::new();
        let result = sandbox
            .run_code("21 * 2", Duration::from_millis(1000), tools())
            .await;
        assert_eq!(result.error, None);
        assert_eq!(result.return_value, Some(json!(84)));
        assert!(result.console_logs.is_empty());
    }

    #[tokio::test]
    async fn test_tool_call_prefers_structured_content() {
        let sandbox = Sandbox::new();
        let result = sandbox
            .run_code(
                r#"let r = tools.call("add", #{"a": 2, "b": 3}); r.sum"#,
                Duration::from_millis(1000),
                tools(),
            )
            .await;
        assert_eq!(result.error, None);
        assert_eq!(result.return_value, Some(json!(5)));
    }

    #[tokio::test]
    async fn test_text_content_parsed_as_json() {
        let sandbox = Sandbox::new();
        let result = sandbox
            .run_code(
                r#"let r = tools.call("text_json"); r.ok"#,
                Duration::from_millis(1000),
                tools(),
            )
            .await;
        assert_eq!(result.return_value, Some(json!(true)));
    }

    #[tokio::test]
    async fn test_plain_text_returned_as_string() {
        let sandbox = Sandbox::new();
        let result = sandbox
            .run_code(
                r#"tools.call("plain_text")"#,
                Duration::from_millis(1000),
                tools(),
            )
            .await;
        assert_eq!(result.return_value, Some(json!("just words")));
    }

    #[tokio::test]
    async fn test_console_capture() {
        let sandbox = Sandbox::new();
        let result = sandbox
            .run_code(
                r#"print("hello"); debug("details"); 1"#,
                Duration::from_millis(1000),
                tools(),
            )
            .await;
        assert_eq!(result.console_logs.len(), 2);
        assert_eq!(result.console_logs[0].level, "log");
        assert_eq!(result.console_logs[0].content, "hello");
        assert_eq!(result.console_logs[1].level, "debug");
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out_quickly() {
        let sandbox = Sandbox::new();
        let started = Instant::now();
        let result = sandbox
            .run_code(
                "let x = 0; loop { x += 1; }",
                Duration::from_millis(50),
                tools(),
            )
            .await;
        assert!(started.elapsed() <= Duration::from_millis(150));
        assert_eq!(result.error.as_deref(), Some(TIMEOUT_ERROR));
        assert!(result.console_logs.is_empty());
        assert!(result.return_value.is_none());
    }

    #[tokio::test]
    async fn test_pending_tool_call_cancelled_on_timeout() {
        let sandbox = Sandbox::new();
        let started = Instant::now();
        let result = sandbox
            .run_code(
                r#"tools.call("slow")"#,
                Duration::from_millis(50),
                tools(),
            )
            .await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_script_error_reported() {
        let sandbox = Sandbox::new();
        let result = sandbox
            .run_code("this is not rhai", Duration::from_millis(500), tools())
            .await;
        assert!(result.error.is_some());
        assert!(result.return_value.is_none());
    }

    #[tokio::test]
    async fn test_failed_tool_call_raises_in_script() {
        let sandbox = Sandbox::new();
        let result = sandbox
            .run_code(
                r#"tools.call("missing", #{})"#,
                Duration::from_millis(500),
                tools(),
            )
            .await;
        let error = result.error.expect("tool failure surfaces");
        assert!(error.contains("Tool not found"), "{error}");
    }
}
