//! # Protocol Validation
//!
//! Validation for the MCP messages the mesh routes. The gateway sits
//! between arbitrary callers and heterogeneous downstream servers, so the
//! requests it accepts and the surfaces it aggregates are checked before
//! they travel any further.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::jsonrpc::JsonRpcRequest;
use crate::types::{Resource, Tool};

static METHOD_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_/]*$").expect("static regex"));

static URI_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*:").expect("static regex"));

/// Validation rules configuration
#[derive(Debug, Clone)]
pub struct ValidationRules {
    /// Maximum accepted string length
    pub max_string_length: usize,
    /// Maximum accepted array length
    pub max_array_length: usize,
    /// Maximum accepted object nesting depth
    pub max_object_depth: usize,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            max_string_length: 1024 * 1024,
            max_array_length: 10_000,
            max_object_depth: 32,
        }
    }
}

/// One validation failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Stable error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Field path, when the failure is field-specific
    pub field_path: Option<String>,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.field_path {
            Some(path) => write!(f, "{} at {path}: {}", self.code, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

/// Validation outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// Validation passed
    Valid,
    /// Validation failed
    Invalid(Vec<ValidationError>),
}

impl ValidationResult {
    /// Whether validation passed
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    /// Flatten the failures into one message, empty when valid
    pub fn flatten(&self) -> String {
        match self {
            Self::Valid => String::new(),
            Self::Invalid(errors) => errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; "),
        }
    }
}

#[derive(Debug, Default)]
struct ValidationContext {
    errors: Vec<ValidationError>,
}

impl ValidationContext {
    fn add_error(&mut self, code: &str, message: impl Into<String>, field_path: Option<&str>) {
        self.errors.push(ValidationError {
            code: code.to_string(),
            message: message.into(),
            field_path: field_path.map(String::from),
        });
    }

    fn into_result(self) -> ValidationResult {
        if self.errors.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid(self.errors)
        }
    }
}

/// Protocol message validator
#[derive(Debug, Clone, Default)]
pub struct ProtocolValidator {
    rules: ValidationRules,
}

impl ProtocolValidator {
    /// Create a validator with default rules
    pub fn new() -> Self {
        Self::default()
    }

    /// Set custom validation rules
    #[must_use]
    pub fn with_rules(mut self, rules: ValidationRules) -> Self {
        self.rules = rules;
        self
    }

    /// Validate an inbound JSON-RPC request before dispatch.
    pub fn validate_request(&self, request: &JsonRpcRequest) -> ValidationResult {
        let mut ctx = ValidationContext::default();

        if !METHOD_NAME_REGEX.is_match(&request.method) {
            ctx.add_error(
                "INVALID_METHOD_NAME",
                format!("malformed method name: {:?}", request.method),
                Some("method"),
            );
        }
        if let Some(params) = &request.params {
            if !params.is_object() && !params.is_null() {
                ctx.add_error(
                    "INVALID_PARAMS_SHAPE",
                    "params must be an object",
                    Some("params"),
                );
            }
            self.validate_value_depth(params, 0, "params", &mut ctx);
        }

        ctx.into_result()
    }

    /// Validate a tool definition reported by a downstream server.
    pub fn validate_tool(&self, tool: &Tool) -> ValidationResult {
        let mut ctx = ValidationContext::default();

        if tool.name.is_empty() {
            ctx.add_error("TOOL_EMPTY_NAME", "tool name cannot be empty", Some("name"));
        }
        if tool.name.len() > self.rules.max_string_length {
            ctx.add_error(
                "TOOL_NAME_TOO_LONG",
                format!(
                    "tool name exceeds maximum length of {}",
                    self.rules.max_string_length
                ),
                Some("name"),
            );
        }
        if tool.input_schema.schema_type != "object" {
            ctx.add_error(
                "TOOL_SCHEMA_NOT_OBJECT",
                format!(
                    "input schema type must be \"object\", got {:?}",
                    tool.input_schema.schema_type
                ),
                Some("inputSchema.type"),
            );
        }

        ctx.into_result()
    }

    /// Validate a resource definition reported by a downstream server.
    pub fn validate_resource(&self, resource: &Resource) -> ValidationResult {
        let mut ctx = ValidationContext::default();

        if resource.name.is_empty() {
            ctx.add_error(
                "RESOURCE_EMPTY_NAME",
                "resource name cannot be empty",
                Some("name"),
            );
        }
        if !URI_REGEX.is_match(&resource.uri) {
            ctx.add_error(
                "RESOURCE_INVALID_URI",
                format!("resource uri has no scheme: {:?}", resource.uri),
                Some("uri"),
            );
        }

        ctx.into_result()
    }

    fn validate_value_depth(
        &self,
        value: &Value,
        depth: usize,
        path: &str,
        ctx: &mut ValidationContext,
    ) {
        if depth > self.rules.max_object_depth {
            ctx.add_error(
                "VALUE_TOO_DEEP",
                format!("nesting exceeds {} levels", self.rules.max_object_depth),
                Some(path),
            );
            return;
        }
        match value {
            Value::Array(items) => {
                if items.len() > self.rules.max_array_length {
                    ctx.add_error(
                        "ARRAY_TOO_LONG",
                        format!("array exceeds {} items", self.rules.max_array_length),
                        Some(path),
                    );
                    return;
                }
                for item in items {
                    self.validate_value_depth(item, depth + 1, path, ctx);
                }
            }
            Value::Object(map) => {
                for entry in map.values() {
                    self.validate_value_depth(entry, depth + 1, path, ctx);
                }
            }
            Value::String(s) => {
                if s.len() > self.rules.max_string_length {
                    ctx.add_error(
                        "STRING_TOO_LONG",
                        format!("string exceeds {} bytes", self.rules.max_string_length),
                        Some(path),
                    );
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolSchema;
    use meshmcp_core::MessageId;
    use serde_json::json;

    fn validator() -> ProtocolValidator {
        ProtocolValidator::new()
    }

    #[test]
    fn test_valid_request() {
        let request = JsonRpcRequest::new(
            "tools/call",
            Some(json!({"name": "echo", "arguments": {"x": 1}})),
            MessageId::from(1),
        );
        assert!(validator().validate_request(&request).is_valid());
    }

    #[test]
    fn test_malformed_method_name() {
        let request = JsonRpcRequest::new("9bad method!", None, MessageId::from(1));
        let result = validator().validate_request(&request);
        assert!(!result.is_valid());
        assert!(result.flatten().contains("INVALID_METHOD_NAME"));
    }

    #[test]
    fn test_non_object_params_rejected() {
        let request = JsonRpcRequest::new("tools/list", Some(json!([1, 2])), MessageId::from(1));
        let result = validator().validate_request(&request);
        assert!(result.flatten().contains("INVALID_PARAMS_SHAPE"));
    }

    #[test]
    fn test_deep_nesting_rejected() {
        let mut value = json!("leaf");
        for _ in 0..40 {
            value = json!({ "next": value });
        }
        let request = JsonRpcRequest::new(
            "tools/call",
            Some(json!({"name": "x", "arguments": value})),
            MessageId::from(1),
        );
        let result = validator().validate_request(&request);
        assert!(result.flatten().contains("VALUE_TOO_DEEP"));
    }

    #[test]
    fn test_tool_validation() {
        let mut tool = Tool {
            name: "echo".to_string(),
            title: None,
            description: None,
            input_schema: ToolSchema::any_object(),
            output_schema: None,
            meta: None,
        };
        assert!(validator().validate_tool(&tool).is_valid());

        tool.name.clear();
        assert!(!validator().validate_tool(&tool).is_valid());

        tool.name = "echo".to_string();
        tool.input_schema.schema_type = "array".to_string();
        let result = validator().validate_tool(&tool);
        assert!(result.flatten().contains("TOOL_SCHEMA_NOT_OBJECT"));
    }

    #[test]
    fn test_resource_validation() {
        let resource = Resource {
            name: "notes".to_string(),
            uri: "file:///notes.txt".to_string(),
            description: None,
            mime_type: None,
            size: None,
        };
        assert!(validator().validate_resource(&resource).is_valid());

        let bad = Resource {
            uri: "no-scheme-here".to_string(),
            ..resource
        };
        let result = validator().validate_resource(&bad);
        assert!(result.flatten().contains("RESOURCE_INVALID_URI"));
    }

    #[test]
    fn test_flatten_joins_errors() {
        let result = ValidationResult::Invalid(vec![
            ValidationError {
                code: "A".to_string(),
                message: "first".to_string(),
                field_path: None,
            },
            ValidationError {
                code: "B".to_string(),
                message: "second".to_string(),
                field_path: Some("x".to_string()),
            },
        ]);
        let flat = result.flatten();
        assert!(flat.contains("A: first"));
        assert!(flat.contains("B at x: second"));
    }
}
