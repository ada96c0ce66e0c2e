//! Process transport for MCP stdio servers
//!
//! Spawns the server subprocess, frames outgoing messages as
//! newline-delimited JSON, forwards stderr as diagnostics, and runs the
//! escalating shutdown sequence.

use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{McpClientError, Result};

/// Out-of-band events carried by a connection's event stream.
///
/// Subscribers receive these via [`broadcast::Receiver`]; dropping the
/// receiver unsubscribes. None of these events are protocol data.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// A line the server wrote to stderr
    Stderr(String),

    /// A stdout line that was not valid JSON; the connection continues
    DecodeError { line: String },

    /// A response whose id matched no pending request
    UnexpectedResponse { id: i64 },

    /// The server process exited, with its exit code when available
    Exited { code: Option<i32> },

    /// The connection reached its terminal state
    Closed,
}

/// The spawned server process with its three stdio handles detached.
pub struct ServerProcess {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Spawn the MCP server subprocess with piped stdio and the configured
/// environment merged over the inherited one.
pub fn spawn_server(config: &ClientConfig) -> Result<ServerProcess> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in &config.env {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn().map_err(|e| McpClientError::Spawn {
        reason: format!("{}: {}", config.command, e),
    })?;

    let stdin = child.stdin.take().ok_or_else(|| McpClientError::Spawn {
        reason: "failed to capture server stdin".to_string(),
    })?;
    let stdout = child.stdout.take().ok_or_else(|| McpClientError::Spawn {
        reason: "failed to capture server stdout".to_string(),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| McpClientError::Spawn {
        reason: "failed to capture server stderr".to_string(),
    })?;

    debug!(command = %config.command, pid = child.id(), "MCP server process spawned");

    Ok(ServerProcess {
        child,
        stdin,
        stdout,
        stderr,
    })
}

/// Serialize a message and write it as one complete line.
///
/// The caller must hold the stdin lock across the whole call so concurrent
/// requests never interleave partial lines.
pub async fn write_line<T: Serialize>(stdin: &mut ChildStdin, message: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    stdin.write_all(&bytes).await?;
    stdin.flush().await?;
    Ok(())
}

/// Forward server stderr lines as diagnostics until EOF.
///
/// stderr is never interpreted as protocol data.
pub async fn forward_stderr(stderr: ChildStderr, events: broadcast::Sender<ConnectionEvent>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                debug!(target: "iris_mcp_client::server", "{}", line);
                let _ = events.send(ConnectionEvent::Stderr(line));
            }
            Ok(None) => break,
            Err(e) => {
                warn!("error reading server stderr: {}", e);
                break;
            }
        }
    }
}

/// Wait for the server to exit on its own, force-killing it after the grace
/// period. The caller must have closed stdin first. Always reaps the exit
/// status, so no zombie is left behind.
pub async fn terminate(mut child: Child, grace: Duration) -> Option<i32> {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(code = ?status.code(), "server exited within grace period");
            return status.code();
        }
        Ok(Err(e)) => {
            warn!("wait on server process failed: {}", e);
            return None;
        }
        Err(_) => {
            warn!(grace_secs = grace.as_secs(), "server did not exit within grace period, killing");
        }
    }

    if let Err(e) = child.start_kill() {
        warn!("failed to kill server process: {}", e);
    }
    match child.wait().await {
        Ok(status) => status.code(),
        Err(e) => {
            warn!("wait after kill failed: {}", e);
            None
        }
    }
}
