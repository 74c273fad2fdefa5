//! RPC transport to a plugin child process.
//!
//! Provides the [`PluginTransport`] trait and [`StdioTransport`], which
//! communicates with a child process over stdin/stdout using request-ID
//! multiplexing for concurrent requests. Liveness reporting and teardown
//! live here too, because the connection and the child process share a
//! lifetime: once the child exits or its stdout closes, the transport is
//! permanently dead and the supervision layer must relaunch.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

use driftvault_plugin::{PluginError, Result};

use crate::wire::{JsonRpcRequest, JsonRpcResponse};

/// Transport layer for plugin JSON-RPC communication.
///
/// One transport corresponds to one incarnation of a plugin process.
/// It is never reconnected; the supervisor replaces the whole transport
/// when the process dies.
#[async_trait]
pub trait PluginTransport: Send + Sync {
    /// Send a JSON-RPC request and return the response.
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Liveness verdict with no side effects: `false` once the child has
    /// exited or the connection is broken.
    fn is_alive(&self) -> bool;

    /// Kill the child process and release the connection. Idempotent.
    async fn terminate(&self);
}

/// Pending response registry: maps request IDs to oneshot senders.
type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Default timeout for waiting on a response from the plugin process.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport that communicates with a plugin child process via stdin/stdout.
///
/// Uses a background reader task and request-ID multiplexing to support
/// concurrent requests. Each `send_request` call registers a oneshot
/// channel keyed by the request ID, writes to stdin, and waits for the
/// background reader to deliver the matching response.
pub struct StdioTransport {
    child: Arc<Mutex<Child>>,
    stdin: Arc<Mutex<tokio::process::ChildStdin>>,
    pending: PendingMap,
    alive: Arc<AtomicBool>,
    pid: Option<u32>,
    request_timeout: Duration,
}

impl StdioTransport {
    /// Spawn a plugin child process and set up JSON-RPC communication.
    ///
    /// The child's stderr is discarded; plugins are expected to report
    /// failures through RPC error responses.
    pub async fn spawn(
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| PluginError::Launch(format!("failed to spawn {command}: {e}")))?;
        let pid = child.id();

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PluginError::Launch("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PluginError::Launch("failed to capture stdout".into()))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let alive = Arc::new(AtomicBool::new(true));

        // Background reader task: reads lines from stdout and dispatches
        // responses to the matching pending oneshot sender. When it exits
        // (EOF or read error), the transport is dead for good.
        let reader_pending = Arc::clone(&pending);
        let reader_alive = Arc::clone(&alive);
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        debug!(pid, "plugin reader: child closed stdout");
                        break;
                    }
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<JsonRpcResponse>(trimmed) {
                            Ok(response) => {
                                let id = response.id;
                                let mut map = reader_pending.lock().await;
                                if let Some(tx) = map.remove(&id) {
                                    let _ = tx.send(response);
                                } else {
                                    warn!(id, "plugin reader: response with no pending request");
                                }
                            }
                            Err(e) => {
                                debug!(error = %e, "plugin reader: ignoring non-response line");
                            }
                        }
                    }
                    Err(e) => {
                        warn!(pid, error = %e, "plugin reader: read error, exiting");
                        break;
                    }
                }
            }

            reader_alive.store(false, Ordering::SeqCst);
            // Fail all pending requests: their oneshot senders drop here.
            let mut map = reader_pending.lock().await;
            map.clear();
        });

        debug!(command, pid, "spawned plugin process");

        Ok(Self {
            child: Arc::new(Mutex::new(child)),
            stdin: Arc::new(Mutex::new(stdin)),
            pending,
            alive,
            pid,
            request_timeout,
        })
    }

    /// OS process identifier of the child, if still known.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

impl std::fmt::Debug for StdioTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioTransport")
            .field("pid", &self.pid)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl PluginTransport for StdioTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        if !self.is_alive() {
            return Err(PluginError::Transport("plugin process is dead".into()));
        }

        let mut line = serde_json::to_string(&request)?;
        line.push('\n');

        let id = request.id;
        debug!(method = %request.method, id, "sending plugin request");

        // Register a oneshot channel for this request ID.
        let (tx, rx) = oneshot::channel::<JsonRpcResponse>();
        {
            let mut map = self.pending.lock().await;
            map.insert(id, tx);
        }

        // Write to stdin.
        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                self.pending.lock().await.remove(&id);
                return Err(PluginError::Transport(format!(
                    "failed to write to plugin stdin: {e}"
                )));
            }
            if let Err(e) = stdin.flush().await {
                self.pending.lock().await.remove(&id);
                return Err(PluginError::Transport(format!(
                    "failed to flush plugin stdin: {e}"
                )));
            }
        }

        // Wait for the background reader to deliver the response, with timeout.
        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                // Oneshot sender was dropped: the reader task exited.
                Err(PluginError::Transport(
                    "plugin closed its connection before responding".into(),
                ))
            }
            Err(_) => {
                let mut map = self.pending.lock().await;
                map.remove(&id);
                Err(PluginError::Transport(format!(
                    "request {id} timed out after {}s",
                    self.request_timeout.as_secs()
                )))
            }
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn terminate(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let mut child = self.child.lock().await;
        // The process may already be gone; that is fine.
        if let Err(e) = child.start_kill() {
            debug!(pid = self.pid, error = %e, "plugin already exited on terminate");
        }
        let _ = child.wait().await;
        debug!(pid = self.pid, "plugin process terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // `cat` echoes each request line back; the echoed request parses as a
    // response (jsonrpc + id, no result/error), which is enough to exercise
    // the multiplexing path against a real child process.
    #[cfg(unix)]
    #[tokio::test]
    async fn stdio_roundtrip_against_cat() {
        let transport = StdioTransport::spawn(
            "cat",
            &[],
            &HashMap::new(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert!(transport.is_alive());
        assert!(transport.pid().is_some());

        let resp = transport
            .send_request(JsonRpcRequest::new(7, "plugin/handshake", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(resp.id, 7);
        assert!(resp.result.is_none());
        assert!(resp.error.is_none());

        transport.terminate().await;
        assert!(!transport.is_alive());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn send_after_terminate_fails() {
        let transport = StdioTransport::spawn(
            "cat",
            &[],
            &HashMap::new(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        transport.terminate().await;
        let err = transport
            .send_request(JsonRpcRequest::new(1, "plugin/handshake", serde_json::json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Transport(_)));
    }

    #[tokio::test]
    async fn spawn_missing_executable_fails() {
        let err = StdioTransport::spawn(
            "/nonexistent/driftvault-plugin-void",
            &[],
            &HashMap::new(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PluginError::Launch(_)));
    }
}
