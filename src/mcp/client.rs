//! MCP client connection
//!
//! One connection owns one server subprocess, a reader task that routes
//! responses by correlation id, and the lifecycle state machine that gates
//! every operation on the handshake having completed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{McpClientError, Result};
use crate::mcp::transport::{self, ConnectionEvent};
use crate::mcp::types::{
    methods, CallToolParams, CallToolResult, ClientCapabilities, ClientInfo, InitializeParams,
    InitializeResult, JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse,
    ListToolsResult, ToolDescriptor, MCP_VERSION,
};

/// Connection lifecycle states.
///
/// Requests are only accepted in `Ready`; everything else fails fast with
/// `NotConnected` before touching the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotStarted,
    Starting,
    Handshaking,
    Ready,
    ShuttingDown,
    Closed,
    Errored,
}

/// A registered request awaiting its response.
///
/// Owned exclusively by the pending table; resolved exactly once by
/// whichever of {matching response, timeout, connection close} fires first.
struct PendingEntry {
    method: String,
    tx: oneshot::Sender<Result<Value>>,
}

struct ClientInner {
    config: ClientConfig,
    state: Mutex<ConnectionState>,
    next_id: AtomicI64,
    pending: Mutex<HashMap<i64, PendingEntry>>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    child: tokio::sync::Mutex<Option<Child>>,
    events: broadcast::Sender<ConnectionEvent>,
}

/// Client for one MCP server connection over stdio.
///
/// Cheap to clone; all clones share the same connection.
#[derive(Clone)]
pub struct McpClient {
    inner: Arc<ClientInner>,
}

impl McpClient {
    /// Create a client in the `NotStarted` state. No process is spawned
    /// until [`start`](Self::start) is called.
    pub fn new(config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(ClientInner {
                config,
                state: Mutex::new(ConnectionState::NotStarted),
                next_id: AtomicI64::new(1),
                pending: Mutex::new(HashMap::new()),
                stdin: tokio::sync::Mutex::new(None),
                child: tokio::sync::Mutex::new(None),
                events,
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock().unwrap()
    }

    /// Subscribe to this connection's out-of-band events.
    ///
    /// Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Spawn the server and perform the initialize handshake.
    ///
    /// On success the connection is `Ready` and tool calls are accepted.
    /// Fails with `AlreadyStarted` if called twice, `Spawn` if the process
    /// could not be created, and `Handshake` if initialize was rejected,
    /// timed out, or the server exited before answering.
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state != ConnectionState::NotStarted {
                return Err(McpClientError::AlreadyStarted);
            }
            *state = ConnectionState::Starting;
        }

        let server = match transport::spawn_server(&self.inner.config) {
            Ok(server) => server,
            Err(e) => {
                self.inner.set_state(ConnectionState::Errored);
                return Err(e);
            }
        };

        *self.inner.stdin.lock().await = Some(server.stdin);
        *self.inner.child.lock().await = Some(server.child);

        tokio::spawn(transport::forward_stderr(
            server.stderr,
            self.inner.events.clone(),
        ));
        tokio::spawn(read_loop(self.inner.clone(), server.stdout));

        self.inner.set_state(ConnectionState::Handshaking);

        match self.handshake().await {
            Ok(init) => {
                debug!(
                    server = %init.server_info.name,
                    version = %init.server_info.version,
                    protocol = %init.protocol_version,
                    "MCP handshake complete"
                );
                // The reader may have seen EOF while the handshake was
                // finishing; Ready must not overwrite Closed.
                if !self
                    .inner
                    .transition(ConnectionState::Handshaking, ConnectionState::Ready)
                {
                    return Err(McpClientError::Handshake {
                        reason: "connection closed during handshake".to_string(),
                    });
                }
                Ok(())
            }
            Err(e) => {
                self.teardown().await;
                self.inner.set_state(ConnectionState::Errored);
                Err(McpClientError::Handshake {
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Send `initialize`, then the `notifications/initialized` notification.
    async fn handshake(&self) -> Result<InitializeResult> {
        let params = InitializeParams {
            protocol_version: MCP_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: ClientInfo {
                name: self.inner.config.client_name.clone(),
                version: self.inner.config.client_version.clone(),
            },
        };

        let value = self
            .request_unchecked(methods::INITIALIZE, Some(serde_json::to_value(&params)?))
            .await?;
        let init: InitializeResult = serde_json::from_value(value)?;

        self.notify(methods::INITIALIZED, None).await?;
        Ok(init)
    }

    /// Send a request and await its correlated response.
    ///
    /// Rejected with `NotConnected` unless the connection is `Ready`.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        if self.state() != ConnectionState::Ready {
            return Err(McpClientError::NotConnected);
        }
        self.request_unchecked(method, params).await
    }

    /// Request path shared by the handshake (which runs before `Ready`).
    async fn request_unchecked(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let (id, rx) = self.inner.register(method);
        let request = JsonRpcRequest::new(id, method, params);

        // One deadline covers the write and the wait: a server that stops
        // draining stdin must not stall the caller, and dropping the blocked
        // write releases the stdin lock so shutdown is never stuck behind it.
        let exchange = async {
            if let Err(e) = self.write_frame(&request).await {
                self.inner.pending.lock().unwrap().remove(&id);
                return Err(e);
            }
            match rx.await {
                Ok(outcome) => outcome,
                // Sender dropped without resolving; only happens when the
                // connection tore down between registration and resolution.
                Err(_) => Err(McpClientError::ConnectionClosed),
            }
        };

        match tokio::time::timeout(self.inner.config.request_timeout, exchange).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.inner.pending.lock().unwrap().remove(&id);
                Err(McpClientError::Timeout {
                    id,
                    method: method.to_string(),
                    secs: self.inner.config.request_timeout.as_secs(),
                })
            }
        }
    }

    /// Send a fire-and-forget notification (no id, no pending entry).
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let note = JsonRpcNotification::new(method, params);
        self.write_frame(&note).await
    }

    /// Write one frame while holding the stdin lock, so concurrent callers
    /// never interleave partial lines.
    async fn write_frame<T: serde::Serialize>(&self, message: &T) -> Result<()> {
        let mut stdin = self.inner.stdin.lock().await;
        match stdin.as_mut() {
            Some(handle) => transport::write_line(handle, message)
                .await
                .map_err(|e| match e {
                    // A broken pipe means the server is gone.
                    McpClientError::Io(_) => McpClientError::ConnectionClosed,
                    other => other,
                }),
            None => Err(McpClientError::NotConnected),
        }
    }

    /// Invoke a named tool with the given arguments.
    ///
    /// Resolves to the tool result's `content`, or the raw result when the
    /// server returns no structured content field. A result flagged
    /// `isError: true` surfaces as `ToolFailed` carrying the tool's message
    /// text.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let result = self
            .request(methods::CALL_TOOL, Some(serde_json::to_value(&params)?))
            .await?;
        match result.get("content") {
            Some(content) => {
                // Check the failure flag before handing the content out. An
                // envelope this client cannot parse is left to the caller.
                if let Ok(parsed) = serde_json::from_value::<CallToolResult>(result.clone()) {
                    if parsed.is_error {
                        let message = parsed
                            .first_text()
                            .map(|text| {
                                text.strip_prefix("Error:").unwrap_or(text).trim().to_string()
                            })
                            .unwrap_or_else(|| "tool reported an error".to_string());
                        return Err(McpClientError::ToolFailed {
                            name: name.to_string(),
                            message,
                        });
                    }
                }
                Ok(content.clone())
            }
            None => Ok(result),
        }
    }

    /// List the tools the server exposes. An absent or malformed tool list
    /// is treated as empty.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let value = self.request(methods::LIST_TOOLS, None).await?;
        let parsed: ListToolsResult = serde_json::from_value(value).unwrap_or_default();
        Ok(parsed.tools)
    }

    /// Liveness probe.
    pub async fn ping(&self) -> Result<()> {
        self.request(methods::PING, None).await.map(|_| ())
    }

    /// Shut the connection down: stop accepting requests, close stdin, wait
    /// up to the grace period, force-kill if needed, and fail anything still
    /// pending with `ConnectionClosed`.
    ///
    /// Idempotent: calling it twice, or after the server already exited,
    /// succeeds without side effects.
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state == ConnectionState::Closed {
                return Ok(());
            }
            *state = ConnectionState::ShuttingDown;
        }

        self.teardown().await;
        Ok(())
    }

    /// Release the subprocess and resolve all remaining pending entries.
    async fn teardown(&self) {
        // Closing stdin signals "no more input" to a well-behaved server.
        self.inner.stdin.lock().await.take();

        if let Some(child) = self.inner.child.lock().await.take() {
            let code = transport::terminate(child, self.inner.config.shutdown_grace).await;
            let _ = self.inner.events.send(ConnectionEvent::Exited { code });
        }

        self.inner.fail_all_pending();
        self.inner.close();
    }
}

impl ClientInner {
    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap() = state;
    }

    /// Move from `from` to `to`; a no-op returning false when some other
    /// path won the transition first.
    fn transition(&self, from: ConnectionState, to: ConnectionState) -> bool {
        let mut state = self.state.lock().unwrap();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    /// Allocate the next correlation id and register a pending entry for it.
    fn register(&self, method: &str) -> (i64, oneshot::Receiver<Result<Value>>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(
            id,
            PendingEntry {
                method: method.to_string(),
                tx,
            },
        );
        (id, rx)
    }

    /// Route one decoded stdout line.
    ///
    /// Malformed lines and unknown ids are diagnostics, never fatal: the
    /// reader resumes at the next line either way.
    fn handle_line(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }

        let message: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!("skipping undecodable server line: {}", e);
                let _ = self.events.send(ConnectionEvent::DecodeError {
                    line: line.to_string(),
                });
                return;
            }
        };

        // Server-initiated notifications/requests are out of scope; log and
        // move on.
        if let Some(method) = message.get("method").and_then(Value::as_str) {
            debug!(method, "ignoring server-initiated message");
            return;
        }

        let response: JsonRpcResponse = match serde_json::from_value(message) {
            Ok(response) => response,
            Err(e) => {
                warn!("skipping malformed response envelope: {}", e);
                let _ = self.events.send(ConnectionEvent::DecodeError {
                    line: line.to_string(),
                });
                return;
            }
        };

        // This client only allocates numeric ids, so a string id cannot
        // match a pending entry.
        let Some(id) = response.id.as_number() else {
            warn!("response with non-numeric id, ignoring");
            return;
        };

        let entry = self.pending.lock().unwrap().remove(&id);
        let Some(entry) = entry else {
            warn!(id, "response matched no pending request");
            let _ = self.events.send(ConnectionEvent::UnexpectedResponse { id });
            return;
        };

        let outcome = match response.error {
            Some(JsonRpcError {
                code,
                message,
                data,
            }) => Err(McpClientError::Remote {
                method: entry.method,
                code,
                message,
                data,
            }),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };

        // The caller may have timed out and dropped its receiver.
        let _ = entry.tx.send(outcome);
    }

    /// Reject every outstanding request with `ConnectionClosed`.
    fn fail_all_pending(&self) {
        let drained: Vec<PendingEntry> = {
            let mut pending = self.pending.lock().unwrap();
            pending.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            let _ = entry.tx.send(Err(McpClientError::ConnectionClosed));
        }
    }

    /// Move to the terminal state and announce it (once).
    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        if *state != ConnectionState::Closed {
            *state = ConnectionState::Closed;
            let _ = self.events.send(ConnectionEvent::Closed);
        }
    }
}

/// Consume decoded lines from the server's stdout until EOF.
///
/// This task is the only resolver of pending entries during normal
/// operation; on EOF it fails whatever is left and closes the connection.
async fn read_loop(inner: Arc<ClientInner>, stdout: ChildStdout) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => inner.handle_line(&line),
            Ok(None) => break,
            Err(e) => {
                warn!("error reading server stdout: {}", e);
                break;
            }
        }
    }

    debug!("server stdout closed");

    // Reap the child unless shutdown() already took it.
    if let Some(child) = inner.child.lock().await.take() {
        let code = transport::terminate(child, inner.config.shutdown_grace).await;
        let _ = inner.events.send(ConnectionEvent::Exited { code });
    }
    inner.stdin.lock().await.take();

    inner.fail_all_pending();
    inner.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ready_inner() -> Arc<ClientInner> {
        let (events, _) = broadcast::channel(64);
        Arc::new(ClientInner {
            config: ClientConfig::new("unused").unwrap(),
            state: Mutex::new(ConnectionState::Ready),
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
            stdin: tokio::sync::Mutex::new(None),
            child: tokio::sync::Mutex::new(None),
            events,
        })
    }

    #[test]
    fn test_ids_are_monotonic_from_one() {
        let inner = ready_inner();
        let (id1, _rx1) = inner.register("tools/list");
        let (id2, _rx2) = inner.register("tools/call");
        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
    }

    #[test]
    fn test_responses_route_by_id_regardless_of_order() {
        let inner = ready_inner();
        let (id1, mut rx1) = inner.register("tools/call");
        let (id2, mut rx2) = inner.register("tools/call");

        // Deliver the second response first.
        inner.handle_line(&format!(
            r#"{{"jsonrpc":"2.0","id":{},"result":{{"slot":"second"}}}}"#,
            id2
        ));
        inner.handle_line(&format!(
            r#"{{"jsonrpc":"2.0","id":{},"result":{{"slot":"first"}}}}"#,
            id1
        ));

        let first = rx1.try_recv().unwrap().unwrap();
        let second = rx2.try_recv().unwrap().unwrap();
        assert_eq!(first["slot"], "first");
        assert_eq!(second["slot"], "second");
    }

    #[test]
    fn test_remote_error_preserved_verbatim() {
        let inner = ready_inner();
        let (id, mut rx) = inner.register("tools/call");

        inner.handle_line(&format!(
            r#"{{"jsonrpc":"2.0","id":{},"error":{{"code":-32000,"message":"tool exploded","data":{{"hint":"retry"}}}}}}"#,
            id
        ));

        match rx.try_recv().unwrap() {
            Err(McpClientError::Remote {
                method,
                code,
                message,
                data,
            }) => {
                assert_eq!(method, "tools/call");
                assert_eq!(code, -32000);
                assert_eq!(message, "tool exploded");
                assert_eq!(data.unwrap()["hint"], "retry");
            }
            other => panic!("expected Remote error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_id_is_nonfatal_and_reported() {
        let inner = ready_inner();
        let mut events = inner.events.subscribe();
        let (id, mut rx) = inner.register("tools/call");

        inner.handle_line(r#"{"jsonrpc":"2.0","id":999,"result":{}}"#);

        // The in-flight request is untouched.
        assert!(rx.try_recv().is_err());
        assert_eq!(inner.pending.lock().unwrap().len(), 1);
        match events.try_recv().unwrap() {
            ConnectionEvent::UnexpectedResponse { id } => assert_eq!(id, 999),
            other => panic!("expected UnexpectedResponse, got {:?}", other),
        }

        // A duplicate of an already-resolved id is equally harmless.
        inner.handle_line(&format!(r#"{{"jsonrpc":"2.0","id":{},"result":1}}"#, id));
        inner.handle_line(&format!(r#"{{"jsonrpc":"2.0","id":{},"result":2}}"#, id));
        assert_eq!(rx.try_recv().unwrap().unwrap(), serde_json::json!(1));
    }

    #[test]
    fn test_malformed_line_skipped() {
        let inner = ready_inner();
        let mut events = inner.events.subscribe();
        let (id, mut rx) = inner.register("tools/list");

        inner.handle_line(r#"{"jsonrpc":"2.0","id":1,"resu"#);
        inner.handle_line(&format!(
            r#"{{"jsonrpc":"2.0","id":{},"result":{{"tools":[]}}}}"#,
            id
        ));

        assert!(rx.try_recv().unwrap().is_ok());
        assert!(matches!(
            events.try_recv().unwrap(),
            ConnectionEvent::DecodeError { .. }
        ));
    }

    #[test]
    fn test_server_notifications_ignored() {
        let inner = ready_inner();
        let (_, mut rx) = inner.register("tools/call");

        inner.handle_line(r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#);

        assert!(rx.try_recv().is_err());
        assert_eq!(inner.pending.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_fail_all_pending_rejects_everyone() {
        let inner = ready_inner();
        let (_, mut rx1) = inner.register("tools/call");
        let (_, mut rx2) = inner.register("tools/list");

        inner.fail_all_pending();

        assert!(matches!(
            rx1.try_recv().unwrap(),
            Err(McpClientError::ConnectionClosed)
        ));
        assert!(matches!(
            rx2.try_recv().unwrap(),
            Err(McpClientError::ConnectionClosed)
        ));
        assert!(inner.pending.lock().unwrap().is_empty());
    }

    #[test]
    fn test_result_defaults_to_null() {
        let inner = ready_inner();
        let (id, mut rx) = inner.register("ping");
        inner.handle_line(&format!(r#"{{"jsonrpc":"2.0","id":{}}}"#, id));
        assert_eq!(rx.try_recv().unwrap().unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn test_requests_rejected_before_start() {
        let client = McpClient::new(ClientConfig::new("unused").unwrap());
        assert_eq!(client.state(), ConnectionState::NotStarted);

        let err = client.call_tool("iris_evaluate_project", json!({})).await;
        assert!(matches!(err, Err(McpClientError::NotConnected)));

        let err = client.list_tools().await;
        assert!(matches!(err, Err(McpClientError::NotConnected)));
    }

    #[tokio::test]
    async fn test_shutdown_before_start_closes_cleanly() {
        let client = McpClient::new(ClientConfig::new("unused").unwrap());
        client.shutdown().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Closed);
        client.shutdown().await.unwrap();
    }
}
