//! Plugin process handle and launcher.
//!
//! [`PluginProcess`] is the handle to one live incarnation of a plugin
//! executable: the OS child process plus its RPC connection. It is owned
//! by the supervisor in `supervisor`, which replaces the whole handle
//! (new process, new generation) when the old one dies.
//!
//! [`PluginLauncher`] is the seam between the supervisor and process
//! creation. The production implementation, [`StdioLauncher`], spawns the
//! executable over stdio and performs the `plugin/handshake` RPC under a
//! bounded startup timeout. Launchers never retry; retry policy belongs
//! to the supervisor's restart protocol.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use driftvault_plugin::{PluginError, Result};

use crate::transport::{DEFAULT_REQUEST_TIMEOUT, PluginTransport, StdioTransport};
use crate::wire::JsonRpcRequest;

/// Version of the driftvault plugin RPC protocol, negotiated during the
/// `plugin/handshake` call. Single source of truth for both sides.
pub const PLUGIN_PROTOCOL_VERSION: u64 = 1;

/// Request ID reserved for the handshake; ordinary requests start at 1.
const HANDSHAKE_REQUEST_ID: u64 = 0;

/// Default time allowed for process start plus handshake.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to one live incarnation of a plugin process.
///
/// Cloning the handle shares the same underlying child process and
/// connection; the supervisor holds the authoritative copy.
#[derive(Clone)]
pub struct PluginProcess {
    executable: String,
    pid: Option<u32>,
    transport: Arc<dyn PluginTransport>,
    request_ids: Arc<AtomicU64>,
}

impl PluginProcess {
    /// Wrap a connected transport in a process handle.
    pub fn new(
        executable: impl Into<String>,
        pid: Option<u32>,
        transport: Arc<dyn PluginTransport>,
    ) -> Self {
        Self {
            executable: executable.into(),
            pid,
            transport,
            request_ids: Arc::new(AtomicU64::new(HANDSHAKE_REQUEST_ID + 1)),
        }
    }

    /// Path or name of the plugin executable.
    pub fn executable(&self) -> &str {
        &self.executable
    }

    /// OS process identifier, if known.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Liveness verdict with no side effects.
    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    /// Kill the process and release the connection. Idempotent.
    pub async fn terminate(&self) {
        self.transport.terminate().await;
    }

    pub(crate) fn transport(&self) -> Arc<dyn PluginTransport> {
        Arc::clone(&self.transport)
    }

    pub(crate) fn request_ids(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.request_ids)
    }
}

impl std::fmt::Debug for PluginProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginProcess")
            .field("executable", &self.executable)
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

/// Creates plugin processes for the supervisor.
#[async_trait]
pub trait PluginLauncher: Send + Sync {
    /// Start a fresh plugin process and establish its RPC connection.
    /// Fails with [`PluginError::Launch`] if the executable cannot be
    /// started or the handshake does not complete within the bound.
    async fn launch(&self) -> Result<PluginProcess>;
}

/// Launches a plugin executable over stdio and performs the handshake.
pub struct StdioLauncher {
    executable: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
    startup_timeout: Duration,
    request_timeout: Duration,
}

impl StdioLauncher {
    /// Create a launcher for the given executable with default timeouts.
    pub fn new(executable: PathBuf) -> Self {
        Self {
            executable,
            args: Vec::new(),
            env: HashMap::new(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Add command-line arguments passed to the plugin executable.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// Add environment variables passed to the plugin executable.
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Bound the time allowed for spawn plus handshake.
    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// Bound the time allowed for each RPC once the process is live.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[async_trait]
impl PluginLauncher for StdioLauncher {
    async fn launch(&self) -> Result<PluginProcess> {
        let command = self.executable.to_string_lossy();
        let transport =
            StdioTransport::spawn(&command, &self.args, &self.env, self.request_timeout).await?;
        let pid = transport.pid();

        // Handshake under the startup bound. A hung plugin must turn into
        // a launch failure instead of blocking the supervisor's callers.
        let handshake = JsonRpcRequest::new(
            HANDSHAKE_REQUEST_ID,
            "plugin/handshake",
            serde_json::json!({ "protocol_version": PLUGIN_PROTOCOL_VERSION }),
        );
        let response = match tokio::time::timeout(
            self.startup_timeout,
            transport.send_request(handshake),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                transport.terminate().await;
                return Err(PluginError::Launch(format!("handshake failed: {e}")));
            }
            Err(_) => {
                transport.terminate().await;
                return Err(PluginError::Launch(format!(
                    "handshake timed out after {}s",
                    self.startup_timeout.as_secs()
                )));
            }
        };

        if let Some(err) = response.error {
            transport.terminate().await;
            return Err(PluginError::Launch(format!(
                "handshake rejected: code={}, message={}",
                err.code, err.message
            )));
        }
        let version = response
            .result
            .as_ref()
            .and_then(|r| r.get("protocol_version"))
            .and_then(|v| v.as_u64());
        if version != Some(PLUGIN_PROTOCOL_VERSION) {
            transport.terminate().await;
            return Err(PluginError::Launch(format!(
                "protocol version mismatch: plugin reported {version:?}, expected {PLUGIN_PROTOCOL_VERSION}"
            )));
        }

        debug!(executable = %command, pid, "plugin handshake complete");
        Ok(PluginProcess::new(
            command.into_owned(),
            pid,
            Arc::new(transport),
        ))
    }
}
