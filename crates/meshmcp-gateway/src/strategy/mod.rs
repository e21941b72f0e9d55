//! Tool-surface strategies.
//!
//! A strategy rewrites the aggregator's exposed tool surface. Passthrough
//! is the aggregator itself; smart selection replaces the surface with
//! search/describe/call meta-tools; code execution adds sandboxed script
//! execution on top. Resources and prompts always pass through.

mod meta;
mod smart;

pub use meta::{
    CALL_TOOL, CODE_EXECUTION_PREFIX, DESCRIBE_TOOL, GATEWAY_PREFIX, RUN_CODE_TOOL, SEARCH_TOOL,
};
pub use smart::{CodeExecutionService, SmartSelectionService};

use std::sync::Arc;

use meshmcp_client::McpService;
use meshmcp_core::model::ToolSurfaceMode;

use crate::aggregator::Aggregator;
use crate::sandbox::Sandbox;

/// Decorate an aggregator with the configured tool-surface strategy.
pub fn decorate(aggregator: Arc<Aggregator>, mode: ToolSurfaceMode) -> Arc<dyn McpService> {
    match mode {
        ToolSurfaceMode::Passthrough => aggregator,
        ToolSurfaceMode::SmartSelection => Arc::new(SmartSelectionService::new(aggregator)),
        ToolSurfaceMode::CodeExecution => {
            Arc::new(CodeExecutionService::new(aggregator, Sandbox::new()))
        }
    }
}
