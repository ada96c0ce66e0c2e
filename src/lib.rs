//! Iris MCP Client Library
//!
//! A Model Context Protocol (MCP) client for the Iris project-health server.
//! Spawns the server as a subprocess, speaks newline-delimited JSON-RPC 2.0
//! over its stdio, and correlates concurrent requests with out-of-order
//! responses.

pub mod config;
pub mod error;
pub mod iris;
pub mod mcp;

pub use config::ClientConfig;
pub use error::{McpClientError, Result};
pub use iris::IrisTools;
pub use mcp::{ConnectionEvent, ConnectionState, McpClient};
