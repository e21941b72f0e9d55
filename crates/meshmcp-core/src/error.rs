//! Shared error model for gateway operations.
//!
//! Component crates keep their own `thiserror` enums close to the code that
//! raises them; this module provides the classification used at crate
//! boundaries and on the wire, where a JSON-RPC error code may accompany the
//! failure.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error classification for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Input validation failed
    Validation,

    /// Authentication or authorization failed
    Unauthorized,

    /// Tool, resource or prompt was not found
    NotFound,

    /// Downstream server does not implement the requested method
    MethodNotFound,

    /// Request was malformed or invalid
    BadRequest,

    /// Network or transport error
    Transport,

    /// Serialization/deserialization error
    Serialization,

    /// Protocol violation or incompatibility
    Protocol,

    /// Operation timed out
    Timeout,

    /// Operation was cancelled
    Cancelled,

    /// Configuration error
    Configuration,

    /// Storage layer failure
    Storage,

    /// Internal error
    Internal,
}

/// Boundary error with classification and an optional JSON-RPC code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Error {
    /// Error classification
    pub kind: ErrorKind,

    /// Human-readable error message
    pub message: String,

    /// JSON-RPC error code when the failure came off the wire
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rpc_code: Option<i32>,
}

impl Error {
    /// Create a new error with the specified kind and message
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            rpc_code: None,
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    /// Create an unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthorized, message)
    }

    /// Create a not-found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    /// Create a bad-request error
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// Create a transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    /// Create a protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Create a cancelled error
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Cancelled, message)
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Configuration, message)
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Storage, message)
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Create an error from a JSON-RPC error code and message.
    ///
    /// `-32601` maps to [`ErrorKind::MethodNotFound`] so callers can treat
    /// optional downstream surfaces as empty; everything else classifies by
    /// the standard code ranges.
    pub fn rpc(code: i32, message: impl Into<String>) -> Self {
        let kind = match code {
            -32601 => ErrorKind::MethodNotFound,
            -32602 | -32600 => ErrorKind::BadRequest,
            -32700 => ErrorKind::Serialization,
            _ => ErrorKind::Protocol,
        };
        Self {
            kind,
            message: message.into(),
            rpc_code: Some(code),
        }
    }

    /// Whether the downstream reported the method as unimplemented
    pub fn is_method_not_found(&self) -> bool {
        self.kind == ErrorKind::MethodNotFound || self.rpc_code == Some(-32601)
    }

    /// Whether this error represents a timeout
    pub fn is_timeout(&self) -> bool {
        self.kind == ErrorKind::Timeout
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rpc_code {
            Some(code) => write!(f, "{:?}: {} (rpc code {code})", self.kind, self.message),
            None => write!(f, "{:?}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}
