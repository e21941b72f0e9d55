//! # Meshmcp Gateway
//!
//! The Virtual MCP engine: aggregation of tools, resources, resource
//! templates and prompts across child connections; tool-surface strategies
//! (passthrough, smart selection, code execution); the bounded code
//! sandbox; and the bridge that serves a composition as an ordinary MCP
//! server over an in-memory transport pair.
//!
//! ## Module Organization
//!
//! ```text
//! meshmcp-gateway/
//! ├── selection/      # Name and URI-wildcard selection filtering
//! ├── aggregator/     # Lazy dedup aggregation with first-wins routing
//! ├── strategy/       # Passthrough / smart-selection / code-execution
//! ├── sandbox/        # Bounded Rhai execution with a bridged tool table
//! ├── server/         # JSON-RPC dispatch loop over a transport
//! ├── bridge/         # Virtual MCP resolution and in-memory serving
//! ├── catalog/        # Tool catalog snapshots for connection records
//! └── gateway/        # Assembly of storage, factory and bridge
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod aggregator;
pub mod bridge;
pub mod catalog;
pub mod gateway;
pub mod sandbox;
pub mod selection;
pub mod server;
pub mod strategy;

pub use aggregator::{Aggregator, AggregatorChild, SurfaceCache};
pub use bridge::VirtualMcpBridge;
pub use catalog::snapshot_tools;
pub use gateway::MeshGateway;
pub use sandbox::{ConsoleLog, Sandbox, SandboxResult};
pub use selection::{matches_any, matches_pattern};
pub use server::{ServeHandle, serve};
pub use strategy::{CodeExecutionService, SmartSelectionService, decorate};
