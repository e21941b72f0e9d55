//! Tool-surface strategy behavior: search relevance, describe, call
//! validation, sandboxed code execution.

mod common;

use std::sync::Arc;

use serde_json::json;

use common::{FakeService, connection, payload, tool};
use meshmcp_client::McpService;
use meshmcp_core::model::{ToolSelectionMode, ToolSurfaceMode};
use meshmcp_gateway::{Aggregator, AggregatorChild, CodeExecutionService, Sandbox, decorate};
use meshmcp_gateway::strategy::{CALL_TOOL, DESCRIBE_TOOL, RUN_CODE_TOOL, SEARCH_TOOL};

fn email_aggregator() -> (Arc<Aggregator>, Arc<FakeService>) {
    let service = FakeService::with_tools(vec![
        tool("send_email", "send email"),
        tool("read_email", "read"),
        tool("email_compose", "compose"),
    ]);
    let aggregator = Arc::new(Aggregator::new(
        vec![AggregatorChild {
            client: service.clone(),
            connection: connection("conn_mail", "Mail"),
            selected_tools: None,
            selected_resources: None,
            selected_prompts: None,
        }],
        ToolSelectionMode::Exclusion,
        None,
    ));
    (aggregator, service)
}

#[tokio::test]
async fn test_smart_selection_exposes_meta_tools_only() {
    let (aggregator, _service) = email_aggregator();
    let surface = decorate(aggregator, ToolSurfaceMode::SmartSelection);

    let names: Vec<String> = surface
        .list_tools()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec![SEARCH_TOOL, DESCRIBE_TOOL, CALL_TOOL]);
}

#[tokio::test]
async fn test_call_tool_schema_enumerates_names() {
    let (aggregator, _service) = email_aggregator();
    let surface = decorate(aggregator, ToolSurfaceMode::SmartSelection);

    let tools = surface.list_tools().await.unwrap();
    let call = tools.iter().find(|t| t.name == CALL_TOOL).unwrap();
    let name_schema = call
        .input_schema
        .properties
        .as_ref()
        .unwrap()
        .get("name")
        .unwrap();
    let names: Vec<&str> = name_schema["enum"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert_eq!(names, vec!["email_compose", "read_email", "send_email"]);
}

#[tokio::test]
async fn test_search_relevance_ordering() {
    let (aggregator, _service) = email_aggregator();
    let surface = decorate(aggregator, ToolSurfaceMode::SmartSelection);

    let result = surface
        .call_tool(
            SEARCH_TOOL,
            json!({"query": "send email", "limit": 2}).as_object().cloned(),
        )
        .await
        .unwrap();
    assert!(!result.failed());

    let body = payload(&result);
    let names: Vec<&str> = body["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    // send_email outranks everything; read_email beats email_compose by
    // stable order on the tie.
    assert_eq!(names, vec!["send_email", "read_email"]);
}

#[tokio::test]
async fn test_search_empty_query_returns_head_of_list() {
    let (aggregator, _service) = email_aggregator();
    let surface = decorate(aggregator, ToolSurfaceMode::SmartSelection);

    let result = surface
        .call_tool(SEARCH_TOOL, json!({"query": "", "limit": 2}).as_object().cloned())
        .await
        .unwrap();
    let body = payload(&result);
    let names: Vec<&str> = body["tools"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|t| t["name"].as_str())
        .collect();
    assert_eq!(names, vec!["send_email", "read_email"]);
}

#[tokio::test]
async fn test_describe_reports_schemas_and_not_found() {
    let (aggregator, _service) = email_aggregator();
    let surface = decorate(aggregator, ToolSurfaceMode::SmartSelection);

    let result = surface
        .call_tool(
            DESCRIBE_TOOL,
            json!({"names": ["send_email", "ghost"]}).as_object().cloned(),
        )
        .await
        .unwrap();
    let body = payload(&result);
    assert_eq!(body["tools"].as_array().unwrap().len(), 1);
    assert_eq!(body["tools"][0]["name"], "send_email");
    assert_eq!(body["tools"][0]["connection"], "Mail");
    assert!(body["tools"][0]["inputSchema"].is_object());
    assert_eq!(body["notFound"], json!(["ghost"]));
}

#[tokio::test]
async fn test_gateway_call_forwards_to_child() {
    let (aggregator, service) = email_aggregator();
    let surface = decorate(aggregator, ToolSurfaceMode::SmartSelection);

    let result = surface
        .call_tool(
            CALL_TOOL,
            json!({"name": "send_email", "arguments": {"to": "x@y.z"}})
                .as_object()
                .cloned(),
        )
        .await
        .unwrap();
    assert!(!result.failed());

    let calls = service.recorded_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tool, "send_email");
    assert_eq!(
        calls[0].arguments,
        json!({"to": "x@y.z"}).as_object().cloned()
    );
}

#[tokio::test]
async fn test_gateway_call_rejects_unknown_and_meta_names() {
    let (aggregator, service) = email_aggregator();
    let surface = decorate(aggregator, ToolSurfaceMode::SmartSelection);

    let result = surface
        .call_tool(CALL_TOOL, json!({"name": "ghost"}).as_object().cloned())
        .await
        .unwrap();
    assert!(result.failed());
    let body = payload(&result);
    assert!(body["error"].as_str().unwrap().contains("ghost"));

    // Meta-tools are not in the aggregated routing table.
    let result = surface
        .call_tool(CALL_TOOL, json!({"name": SEARCH_TOOL}).as_object().cloned())
        .await
        .unwrap();
    assert!(result.failed());
    assert!(service.recorded_calls().is_empty());
}

#[tokio::test]
async fn test_validation_error_payload() {
    let (aggregator, _service) = email_aggregator();
    let surface = decorate(aggregator, ToolSurfaceMode::SmartSelection);

    // "names" is required for describe.
    let result = surface
        .call_tool(DESCRIBE_TOOL, json!({}).as_object().cloned())
        .await
        .unwrap();
    assert!(result.failed());
    let body = payload(&result);
    assert!(body["error"].as_str().unwrap().contains("invalid arguments"));
}

#[tokio::test]
async fn test_direct_tool_call_not_exposed_by_strategy() {
    let (aggregator, _service) = email_aggregator();
    let surface = decorate(aggregator, ToolSurfaceMode::SmartSelection);

    let result = surface.call_tool("send_email", None).await.unwrap();
    assert!(result.failed());
    assert_eq!(
        result.content[0].as_text(),
        Some("Tool not found: send_email")
    );
}

#[tokio::test]
async fn test_code_execution_adds_run_code() {
    let (aggregator, _service) = email_aggregator();
    let surface = decorate(aggregator, ToolSurfaceMode::CodeExecution);

    let names: Vec<String> = surface
        .list_tools()
        .await
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(
        names,
        vec![SEARCH_TOOL, DESCRIBE_TOOL, CALL_TOOL, RUN_CODE_TOOL]
    );
}

#[tokio::test]
async fn test_run_code_calls_tools_and_returns_value() {
    let (aggregator, service) = email_aggregator();
    let surface = CodeExecutionService::new(aggregator, Sandbox::new());

    let result = surface
        .call_tool(
            RUN_CODE_TOOL,
            json!({
                "code": r#"let r = tools.call("send_email", #{"to": "a@b.c"}); r"#,
            })
            .as_object()
            .cloned(),
        )
        .await
        .unwrap();
    assert!(!result.failed());

    let body = payload(&result);
    assert_eq!(body["returnValue"], json!("handled send_email"));
    assert!(body.get("error").is_none());

    let calls = service.recorded_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].tool, "send_email");
}

#[tokio::test]
async fn test_run_code_timeout_reported() {
    let (aggregator, _service) = email_aggregator();
    let surface = CodeExecutionService::new(aggregator, Sandbox::new());

    let result = surface
        .call_tool(
            RUN_CODE_TOOL,
            json!({"code": "let x = 0; loop { x += 1; }", "timeoutMs": 50})
                .as_object()
                .cloned(),
        )
        .await
        .unwrap();
    let body = payload(&result);
    assert_eq!(body["error"], json!("timeout"));
    assert_eq!(body["consoleLogs"], json!([]));
}

#[tokio::test]
async fn test_resources_pass_through_strategies() {
    let service = Arc::new(FakeService {
        resources: vec![common::resource("file:///a/x")],
        ..Default::default()
    });
    let aggregator = Arc::new(Aggregator::new(
        vec![AggregatorChild {
            client: service,
            connection: connection("conn_a", "A"),
            selected_tools: None,
            selected_resources: None,
            selected_prompts: None,
        }],
        ToolSelectionMode::Exclusion,
        None,
    ));
    let surface = decorate(aggregator, ToolSurfaceMode::SmartSelection);

    assert_eq!(surface.list_resources().await.unwrap().len(), 1);
    assert!(surface.read_resource("file:///a/x").await.is_ok());
}
