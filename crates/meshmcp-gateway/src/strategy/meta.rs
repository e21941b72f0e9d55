//! Meta-tool definitions and shared machinery for the rewriting strategies.

use std::sync::Arc;

use dashmap::DashMap;
use serde::Deserialize;
use serde_json::{Map, Value, json};

use meshmcp_client::McpService;
use meshmcp_core::Result;
use meshmcp_protocol::{CallToolResult, Tool, ToolArguments, ToolSchema};

use crate::aggregator::Aggregator;

/// Prefix of gateway-synthesized meta-tools
pub const GATEWAY_PREFIX: &str = "GATEWAY_";

/// Legacy prefix of code-execution internals, filtered from search
pub const CODE_EXECUTION_PREFIX: &str = "CODE_EXECUTION_";

/// Search the aggregated tool surface
pub const SEARCH_TOOL: &str = "GATEWAY_SEARCH_TOOLS";

/// Describe aggregated tools by name
pub const DESCRIBE_TOOL: &str = "GATEWAY_DESCRIBE_TOOLS";

/// Call an aggregated tool by name
pub const CALL_TOOL: &str = "GATEWAY_CALL_TOOL";

/// Run sandboxed code against the aggregated tool surface
pub const RUN_CODE_TOOL: &str = "GATEWAY_RUN_CODE";

/// Default result cap for search
pub(crate) const SEARCH_DEFAULT_LIMIT: usize = 10;

/// Wrap a JSON payload as a single text content block.
pub(crate) fn json_result(payload: &Value) -> CallToolResult {
    CallToolResult::text(payload.to_string())
}

/// Wrap a validation failure as an `isError` text block.
pub(crate) fn json_error(message: impl Into<String>) -> CallToolResult {
    CallToolResult::error(json!({"error": message.into()}).to_string())
}

#[derive(Debug, Deserialize)]
struct SearchArgs {
    #[serde(default)]
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct DescribeArgs {
    names: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CallArgs {
    name: String,
    #[serde(default)]
    arguments: Option<Map<String, Value>>,
}

/// Shared implementation of the search/describe/call meta-tools.
#[derive(Debug)]
pub(crate) struct MetaTools {
    pub(crate) aggregator: Arc<Aggregator>,
    /// Enum schemas for the call tool, keyed by sorted-name signature so a
    /// stable tool surface never rebuilds its JSON schema.
    call_schemas: DashMap<String, ToolSchema>,
}

impl MetaTools {
    pub(crate) fn new(aggregator: Arc<Aggregator>) -> Self {
        Self {
            aggregator,
            call_schemas: DashMap::new(),
        }
    }

    /// The three shared meta-tool definitions (search, describe, call).
    pub(crate) async fn definitions(&self) -> Result<Vec<Tool>> {
        let surface = self.aggregator.tool_surface().await?;
        let mut names: Vec<String> = surface.routes.keys().cloned().collect();
        names.sort();

        let signature = names.join("\u{1}");
        let call_schema = self
            .call_schemas
            .entry(signature)
            .or_insert_with(|| {
                let mut properties = Map::new();
                properties.insert(
                    "name".to_string(),
                    json!({"type": "string", "enum": names, "description": "Tool to call"}),
                );
                properties.insert(
                    "arguments".to_string(),
                    json!({"type": "object", "description": "Arguments passed through to the tool"}),
                );
                ToolSchema::object(properties, vec!["name".to_string()])
            })
            .clone();

        let mut search_props = Map::new();
        search_props.insert(
            "query".to_string(),
            json!({"type": "string", "description": "Search terms"}),
        );
        search_props.insert(
            "limit".to_string(),
            json!({"type": "integer", "default": SEARCH_DEFAULT_LIMIT}),
        );

        let mut describe_props = Map::new();
        describe_props.insert(
            "names".to_string(),
            json!({"type": "array", "items": {"type": "string"}}),
        );

        Ok(vec![
            Tool {
                name: SEARCH_TOOL.to_string(),
                title: None,
                description: Some(
                    "Search the available tools by keyword and get back the best matches"
                        .to_string(),
                ),
                input_schema: ToolSchema::object(search_props, vec![]),
                output_schema: None,
                meta: None,
            },
            Tool {
                name: DESCRIBE_TOOL.to_string(),
                title: None,
                description: Some(
                    "Get full schemas for tools found via search".to_string(),
                ),
                input_schema: ToolSchema::object(describe_props, vec!["names".to_string()]),
                output_schema: None,
                meta: None,
            },
            Tool {
                name: CALL_TOOL.to_string(),
                title: None,
                description: Some("Invoke one of the available tools".to_string()),
                input_schema: call_schema,
                output_schema: None,
                meta: None,
            },
        ])
    }

    pub(crate) async fn search(&self, arguments: Option<ToolArguments>) -> Result<CallToolResult> {
        let args: SearchArgs = match parse_args(arguments) {
            Ok(args) => args,
            Err(message) => return Ok(json_error(message)),
        };
        let limit = args.limit.unwrap_or(SEARCH_DEFAULT_LIMIT);

        let surface = self.aggregator.tool_surface().await?;
        let searchable: Vec<&Tool> = surface
            .items
            .iter()
            .filter(|tool| {
                !tool.name.starts_with(GATEWAY_PREFIX)
                    && !tool.name.starts_with(CODE_EXECUTION_PREFIX)
            })
            .collect();

        let terms = tokenize(&args.query);
        let ranked: Vec<&Tool> = if terms.is_empty() {
            searchable.into_iter().take(limit).collect()
        } else {
            let mut scored: Vec<(i32, &Tool)> = searchable
                .into_iter()
                .filter_map(|tool| {
                    let connection_title = surface
                        .routes
                        .get(&tool.name)
                        .and_then(|id| self.aggregator.connection_title(id))
                        .unwrap_or_default();
                    let score = relevance(tool, connection_title, &terms);
                    (score > 0).then_some((score, tool))
                })
                .collect();
            // Stable sort: equal scores keep aggregation order.
            scored.sort_by(|a, b| b.0.cmp(&a.0));
            scored.into_iter().take(limit).map(|(_, tool)| tool).collect()
        };

        let tools: Vec<Value> = ranked
            .iter()
            .map(|tool| {
                let connection = surface
                    .routes
                    .get(&tool.name)
                    .and_then(|id| self.aggregator.connection_title(id))
                    .unwrap_or_default();
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "connection": connection,
                })
            })
            .collect();
        Ok(json_result(&json!({ "tools": tools })))
    }

    pub(crate) async fn describe(&self, arguments: Option<ToolArguments>) -> Result<CallToolResult> {
        let args: DescribeArgs = match parse_args(arguments) {
            Ok(args) => args,
            Err(message) => return Ok(json_error(message)),
        };

        let surface = self.aggregator.tool_surface().await?;
        let mut tools = Vec::new();
        let mut not_found = Vec::new();
        for name in &args.names {
            match surface.items.iter().find(|tool| &tool.name == name) {
                Some(tool) => {
                    let connection = surface
                        .routes
                        .get(&tool.name)
                        .and_then(|id| self.aggregator.connection_title(id))
                        .unwrap_or_default();
                    tools.push(json!({
                        "name": tool.name,
                        "description": tool.description,
                        "connection": connection,
                        "inputSchema": tool.input_schema,
                        "outputSchema": tool.output_schema,
                    }));
                }
                None => not_found.push(name.clone()),
            }
        }
        Ok(json_result(&json!({"tools": tools, "notFound": not_found})))
    }

    pub(crate) async fn call(&self, arguments: Option<ToolArguments>) -> Result<CallToolResult> {
        let args: CallArgs = match parse_args(arguments) {
            Ok(args) => args,
            Err(message) => return Ok(json_error(message)),
        };

        let surface = self.aggregator.tool_surface().await?;
        if !surface.routes.contains_key(&args.name) {
            return Ok(json_error(format!("Unknown tool: {}", args.name)));
        }
        self.aggregator.call_tool(&args.name, args.arguments).await
    }
}

fn parse_args<T: serde::de::DeserializeOwned>(
    arguments: Option<ToolArguments>,
) -> std::result::Result<T, String> {
    let value = Value::Object(arguments.unwrap_or_default());
    serde_json::from_value(value).map_err(|e| format!("invalid arguments: {e}"))
}

/// Tokenize a search query: split on whitespace and `_-./`, drop tokens
/// shorter than two characters, lowercase.
pub(crate) fn tokenize(query: &str) -> Vec<String> {
    query
        .split(|c: char| c.is_whitespace() || matches!(c, '_' | '-' | '.' | '/'))
        .filter(|token| token.len() >= 2)
        .map(str::to_lowercase)
        .collect()
}

/// Relevance of one tool against the query terms, accumulated per term:
/// exact name match +10, name substring +3, description substring +2,
/// connection-title substring +1.
pub(crate) fn relevance(tool: &Tool, connection_title: &str, terms: &[String]) -> i32 {
    let name = tool.name.to_lowercase();
    let description = tool
        .description
        .as_deref()
        .unwrap_or_default()
        .to_lowercase();
    let title = connection_title.to_lowercase();

    let mut score = 0;
    for term in terms {
        if name == *term {
            score += 10;
        }
        if name.contains(term.as_str()) {
            score += 3;
        }
        if description.contains(term.as_str()) {
            score += 2;
        }
        if title.contains(term.as_str()) {
            score += 1;
        }
    }
    score
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(name: &str, description: &str) -> Tool {
        Tool {
            name: name.to_string(),
            title: None,
            description: Some(description.to_string()),
            input_schema: ToolSchema::any_object(),
            output_schema: None,
            meta: None,
        }
    }

    #[test]
    fn test_tokenize_separators_and_length() {
        assert_eq!(tokenize("send email"), vec!["send", "email"]);
        assert_eq!(tokenize("a send_EMAIL.now/ok-x"), vec!["send", "email", "now", "ok"]);
        assert!(tokenize("").is_empty());
        assert!(tokenize("a b c").is_empty());
    }

    #[test]
    fn test_relevance_components() {
        let terms = tokenize("send email");
        // Name substring hits for both terms plus description hits.
        assert_eq!(relevance(&tool("send_email", "send email"), "", &terms), 10);
        // Single name substring hit.
        assert_eq!(relevance(&tool("email_compose", "compose"), "", &terms), 3);
        assert_eq!(relevance(&tool("read_email", "read"), "", &terms), 3);
        // Exact name match stacks with the substring hit.
        let terms = tokenize("send");
        assert_eq!(relevance(&tool("send", "delivers"), "", &terms), 13);
        // Connection title contributes one point.
        assert_eq!(relevance(&tool("deploy", "ship it"), "Send Hub", &tokenize("send")), 1);
    }
}
