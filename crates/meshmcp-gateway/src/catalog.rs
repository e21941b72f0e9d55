//! Connection catalog snapshots.
//!
//! The platform records a snapshot of the downstream tool catalog on every
//! connection create/update; dashboards and search read it instead of
//! hitting live servers. This module produces those snapshots from a live
//! client. The aggregator never consults them.

use serde_json::Value;
use tracing::warn;

use meshmcp_client::McpService;
use meshmcp_core::Result;
use meshmcp_core::model::ToolDescriptor;
use meshmcp_protocol::{ProtocolValidator, Tool};

/// List the downstream tools and convert them into catalog descriptors.
///
/// Tools that fail validation are dropped with a log line rather than
/// failing the snapshot.
pub async fn snapshot_tools(service: &dyn McpService) -> Result<Vec<ToolDescriptor>> {
    let validator = ProtocolValidator::new();
    let tools = service.list_tools().await?;
    Ok(tools
        .into_iter()
        .filter_map(|tool| {
            let outcome = validator.validate_tool(&tool);
            if !outcome.is_valid() {
                warn!(tool = %tool.name, "Dropping invalid tool from snapshot: {}", outcome.flatten());
                return None;
            }
            Some(descriptor(tool))
        })
        .collect())
}

fn descriptor(tool: Tool) -> ToolDescriptor {
    ToolDescriptor {
        name: tool.name,
        description: tool.description,
        input_schema: serde_json::to_value(&tool.input_schema).ok(),
        output_schema: tool
            .output_schema
            .as_ref()
            .and_then(|schema| serde_json::to_value(schema).ok())
            .filter(|value| *value != Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meshmcp_protocol::{
        CallToolResult, GetPromptResult, Prompt, ReadResourceResult, Resource, ResourceTemplate,
        ToolArguments, ToolSchema,
    };
    use serde_json::Map;

    #[derive(Debug)]
    struct Listing(Vec<Tool>);

    #[async_trait]
    impl McpService for Listing {
        async fn list_tools(&self) -> Result<Vec<Tool>> {
            Ok(self.0.clone())
        }
        async fn call_tool(
            &self,
            _: &str,
            _: Option<ToolArguments>,
        ) -> Result<CallToolResult> {
            unimplemented!("catalog tests only list")
        }
        async fn list_resources(&self) -> Result<Vec<Resource>> {
            Ok(Vec::new())
        }
        async fn list_resource_templates(&self) -> Result<Vec<ResourceTemplate>> {
            Ok(Vec::new())
        }
        async fn read_resource(&self, _: &str) -> Result<ReadResourceResult> {
            unimplemented!("catalog tests only list")
        }
        async fn list_prompts(&self) -> Result<Vec<Prompt>> {
            Ok(Vec::new())
        }
        async fn get_prompt(
            &self,
            _: &str,
            _: Option<Map<String, serde_json::Value>>,
        ) -> Result<GetPromptResult> {
            unimplemented!("catalog tests only list")
        }
        async fn ping(&self) -> Result<()> {
            Ok(())
        }
        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    fn tool(name: &str) -> Tool {
        Tool {
            name: name.to_string(),
            title: None,
            description: Some(format!("does {name}")),
            input_schema: ToolSchema::any_object(),
            output_schema: None,
            meta: None,
        }
    }

    #[tokio::test]
    async fn test_snapshot_converts_tools() {
        let listing = Listing(vec![tool("alpha"), tool("beta")]);
        let snapshot = snapshot_tools(&listing).await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].name, "alpha");
        assert_eq!(snapshot[0].description.as_deref(), Some("does alpha"));
        assert_eq!(
            snapshot[0].input_schema.as_ref().unwrap()["type"],
            "object"
        );
        assert!(snapshot[0].output_schema.is_none());
    }

    #[tokio::test]
    async fn test_snapshot_drops_invalid_tools() {
        let mut broken = tool("");
        broken.name.clear();
        let listing = Listing(vec![broken, tool("ok")]);
        let snapshot = snapshot_tools(&listing).await.unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "ok");
    }
}
