//! Configuration for the Iris MCP client
//!
//! Holds the server command line, merged environment, and timing knobs.

use std::time::Duration;

use crate::error::{ConfigError, Result};

/// Default per-request deadline in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default grace period for shutdown before the server is force-killed.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 5;

/// Configuration for one MCP server connection
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Command used to spawn the MCP server process
    pub command: String,

    /// Arguments passed to the server command
    pub args: Vec<String>,

    /// Extra environment variables merged over the inherited environment
    pub env: Vec<(String, String)>,

    /// Deadline applied independently to each outstanding request
    pub request_timeout: Duration,

    /// How long shutdown waits for the server to exit after stdin closes
    pub shutdown_grace: Duration,

    /// Client name reported during the initialize handshake
    pub client_name: String,

    /// Client version reported during the initialize handshake
    pub client_version: String,
}

impl ClientConfig {
    /// Create a configuration for the given server command, applying
    /// environment-variable overrides for the timing knobs.
    pub fn new(command: impl Into<String>) -> Result<Self> {
        let command = command.into();
        if command.trim().is_empty() {
            return Err(ConfigError::MissingCommand.into());
        }

        let request_timeout =
            duration_from_env("IRIS_MCP_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?;
        let shutdown_grace =
            duration_from_env("IRIS_MCP_SHUTDOWN_GRACE_SECS", DEFAULT_SHUTDOWN_GRACE_SECS)?;

        Ok(Self {
            command,
            args: Vec::new(),
            env: Vec::new(),
            request_timeout,
            shutdown_grace,
            client_name: "iris-mcp-client".to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
        })
    }

    /// Append an argument for the server command
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append arguments for the server command
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Merge an environment variable into the server's environment
    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Parse a `KEY=VALUE` entry and merge it into the server's environment
    pub fn env_entry(mut self, entry: &str) -> Result<Self> {
        let (key, value) = entry.split_once('=').ok_or_else(|| {
            ConfigError::InvalidEnvEntry {
                entry: entry.to_string(),
            }
        })?;
        if key.is_empty() {
            return Err(ConfigError::InvalidEnvEntry {
                entry: entry.to_string(),
            }
            .into());
        }
        self.env.push((key.to_string(), value.to_string()));
        Ok(self)
    }
}

/// Read a duration in whole seconds from an environment variable,
/// falling back to `default_secs` when unset.
fn duration_from_env(var: &str, default_secs: u64) -> Result<Duration> {
    match std::env::var(var) {
        Ok(raw) => {
            let secs: u64 = raw.parse().map_err(|_| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                message: format!("'{}' is not a whole number of seconds", raw),
            })?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(Duration::from_secs(default_secs)),
    }
}
