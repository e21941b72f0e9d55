//! # Meshmcp Transport
//!
//! Downstream transport layer for the mesh gateway: a uniform bidirectional
//! JSON-RPC channel over four concrete transports, plus the middleware that
//! wraps every outbound connection.
//!
//! ## Supported Transports
//!
//! - **Stdio**: child process speaking newline-delimited JSON
//! - **HTTP streamable**: per-request POST with streamed responses
//! - **SSE**: persistent event stream with POST-back endpoint
//! - **WebSocket**: full-duplex text frames
//! - **Memory**: cross-wired in-process pair (Virtual MCP bridge, tests)
//!
//! ## Module Organization
//!
//! ```text
//! meshmcp-transport/
//! ├── core/           # Transport trait and error types
//! ├── headers/        # Shared header snapshots (atomic swap per connection)
//! ├── stdio/          # Child process transport
//! ├── http/           # HTTP streamable transport
//! ├── sse/            # SSE transport and event-stream parser
//! ├── websocket/      # WebSocket transport
//! ├── memory/         # In-memory transport pair
//! └── middleware/     # Auth and monitoring wrappers
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod core;
pub mod headers;
pub mod http;
pub mod memory;
pub mod middleware;
pub mod sse;
pub mod stdio;
pub mod websocket;

// Re-export core transport traits and types
pub use crate::core::{
    Transport, TransportError, TransportKind, TransportMessage, TransportResult,
};

// Re-export transport implementations
pub use http::{HttpConfig, HttpTransport};
pub use memory::MemoryTransport;
pub use sse::{SseConfig, SseTransport};
pub use stdio::{StdioConfig, StdioTransport};
pub use websocket::{WebSocketConfig, WebSocketTransport};

// Re-export header plumbing and middleware
pub use headers::{HeaderRegistry, HeaderSnapshot, SharedHeaders};
pub use middleware::{AuthTransport, HeaderSource, MonitoringContext, MonitoringTransport};
