//! Transport middleware.
//!
//! Middleware wraps a base transport and proxies `start`/`send`/`receive`/
//! `close` while observing messages. Pipelines are built left-to-right:
//! requests flow outer to inner, responses inner to outer.

pub mod auth;
pub mod monitoring;

pub use auth::{AuthTransport, HeaderSource};
pub use monitoring::{MonitoringContext, MonitoringTransport};
