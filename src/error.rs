//! Error types for the Iris MCP client
//!
//! This module defines the error hierarchy for connection lifecycle,
//! request/response correlation, and tool invocation.

use serde_json::Value;
use thiserror::Error;

/// Main error type for the Iris MCP client
#[derive(Error, Debug)]
pub enum McpClientError {
    /// The server subprocess could not be spawned. Only returned from `start()`.
    #[error("Failed to spawn MCP server process: {reason}")]
    Spawn { reason: String },

    /// The initialize handshake was rejected, timed out, or the server exited
    /// before answering. Only returned from `start()`.
    #[error("MCP handshake failed: {reason}")]
    Handshake { reason: String },

    /// `start()` was called on a connection that was already started.
    #[error("Connection already started")]
    AlreadyStarted,

    /// An operation was attempted while the connection was not in the Ready
    /// state. Nothing was written to the server.
    #[error("Not connected to MCP server")]
    NotConnected,

    /// The server answered with a JSON-RPC error object. Code, message, and
    /// data are preserved verbatim from the wire.
    #[error("MCP server error on '{method}' (code {code}): {message}")]
    Remote {
        method: String,
        code: i64,
        message: String,
        data: Option<Value>,
    },

    /// No response arrived within the configured per-request deadline.
    /// Other in-flight requests are unaffected.
    #[error("Request {id} ('{method}') timed out after {secs}s")]
    Timeout { id: i64, method: String, secs: u64 },

    /// The server process exited, or shutdown completed, while the request
    /// was outstanding.
    #[error("Connection closed while request was outstanding")]
    ConnectionClosed,

    /// A tool ran but reported failure in its result.
    #[error("Tool '{name}' failed: {message}")]
    ToolFailed { name: String, message: String },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("No server command configured")]
    MissingCommand,

    #[error("Invalid environment variable entry '{entry}': expected KEY=VALUE")]
    InvalidEnvEntry { entry: String },

    #[error("Invalid value for {var}: {message}")]
    InvalidEnvVar { var: String, message: String },
}

/// Result type alias for Iris MCP client operations
pub type Result<T> = std::result::Result<T, McpClientError>;
