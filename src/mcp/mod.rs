//! MCP protocol implementation
//!
//! JSON-RPC 2.0 over a child process's stdio, newline-delimited.

pub mod client;
pub mod transport;
pub mod types;

pub use client::{ConnectionState, McpClient};
pub use transport::ConnectionEvent;
