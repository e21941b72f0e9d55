//! # Meshmcp Core
//!
//! Foundation crate for the meshmcp gateway providing typed identifiers,
//! the shared error model, request context and environment configuration.
//!
//! ## Architecture
//!
//! ```text
//! meshmcp-core/
//! ├── error/          # Error model shared across crates
//! ├── id/             # Typed id prefixes and minting
//! ├── context/        # Per-request context
//! ├── config/         # Environment-driven configuration
//! ├── model/          # Connections, Virtual MCPs, downstream tokens
//! └── storage/        # Storage traits and the in-memory implementation
//! ```
//!
//! This crate is imported by every other `meshmcp` crate and carries no
//! transport or protocol logic of its own.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod config;
pub mod context;
pub mod error;
pub mod id;
pub mod model;
pub mod storage;

// Re-export commonly used types
pub use config::MeshConfig;
pub use context::{AuthContext, RequestContext};
pub use error::{Error, ErrorKind, Result};
pub use id::{ConnectionId, MessageId, OrganizationId, VirtualMcpId};
pub use model::{Connection, ConnectionStatus, ConnectionType, DownstreamToken, VirtualMcp};
pub use storage::{Storage, ToolCallRecord};

/// Current MCP protocol version spoken by the gateway
pub const PROTOCOL_VERSION: &str = "2025-06-18";

/// Protocol versions accepted from downstream servers
pub const SUPPORTED_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// Maximum message size in bytes (16MB)
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default timeout for pooled client connects in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 30_000;

/// Gateway version information
pub const GATEWAY_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Gateway name identifier used in MCP handshakes
pub const GATEWAY_NAME: &str = "meshmcp";
