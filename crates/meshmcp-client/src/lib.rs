//! # Meshmcp Client
//!
//! Outbound MCP client layer for the mesh gateway: a correlating client
//! over any [`Transport`](meshmcp_transport::Transport), the single-flight
//! client pool, the auth header builder and the outbound client factory.
//!
//! ## Architecture
//!
//! ```text
//! Aggregator / bridge
//!        ↓
//! ClientFactory ── picks transport, composes middleware
//!        ↓
//! ClientPool ───── single-flight, stale eviction
//!        ↓
//! Client ───────── request/response correlation
//!        ↓
//! meshmcp-transport
//! ```

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::all
)]
#![deny(unsafe_code)]

pub mod auth;
pub mod client;
pub mod factory;
pub mod pool;
pub mod service;

pub use auth::{HeaderBuilder, MeshTokenClaims};
pub use client::{Client, ClientOptions};
pub use factory::{ClientFactory, VirtualClientResolver};
pub use pool::{ClientPool, PoolHooks, PoolStats, STALE_ERRORS, is_stale_error};
pub use service::{McpService, ToolCallStream};
