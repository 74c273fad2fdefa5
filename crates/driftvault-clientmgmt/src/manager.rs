//! Top-level entry point for obtaining restartable plugin proxies.
//!
//! The [`Manager`] maps plugin implementation names to executables on
//! disk, maintains one [`RestartableProcess`] supervisor per executable,
//! and hands out restartable proxies that share those supervisors. Two
//! proxies of different kinds served by the same executable share one
//! process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::debug;

use driftvault_plugin::Result;

use crate::process::{DEFAULT_STARTUP_TIMEOUT, PluginLauncher, StdioLauncher};
use crate::restartable::{
    RestartableBackupItemAction, RestartableObjectStore, RestartableVolumeSnapshotter,
};
use crate::supervisor::RestartableProcess;
use crate::transport::DEFAULT_REQUEST_TIMEOUT;

/// How the manager locates and launches plugin executables.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Directory containing plugin executables.
    pub plugin_dir: PathBuf,
    /// Executable name prefix; implementation `aws` resolves to
    /// `<plugin_dir>/<prefix>-aws`.
    pub executable_prefix: String,
    /// Time allowed for process start plus handshake.
    pub startup_timeout: Duration,
    /// Per-RPC timeout once a process is live.
    pub request_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            plugin_dir: PathBuf::from("/usr/local/lib/driftvault/plugins"),
            executable_prefix: "driftvault-plugin".to_string(),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

type LauncherFactory = Box<dyn Fn(PathBuf) -> Arc<dyn PluginLauncher> + Send + Sync>;

/// Dispenses restartable proxies backed by shared per-executable
/// supervisors.
pub struct Manager {
    config: ManagerConfig,
    factory: LauncherFactory,
    processes: Mutex<HashMap<PathBuf, Arc<RestartableProcess>>>,
}

impl Manager {
    /// Create a manager that launches plugin executables over stdio.
    pub fn new(config: ManagerConfig) -> Self {
        let startup_timeout = config.startup_timeout;
        let request_timeout = config.request_timeout;
        Self {
            config,
            factory: Box::new(move |executable| {
                Arc::new(
                    StdioLauncher::new(executable)
                        .with_startup_timeout(startup_timeout)
                        .with_request_timeout(request_timeout),
                )
            }),
            processes: Mutex::new(HashMap::new()),
        }
    }

    /// Create a manager with a custom launcher factory. The factory is
    /// invoked once per distinct executable path.
    pub fn with_launcher_factory(config: ManagerConfig, factory: LauncherFactory) -> Self {
        Self {
            config,
            factory,
            processes: Mutex::new(HashMap::new()),
        }
    }

    /// Restartable object store proxy for implementation `name`.
    pub async fn object_store(&self, name: &str) -> Result<RestartableObjectStore> {
        let process = self.process_for(name).await?;
        RestartableObjectStore::new(name, process).await
    }

    /// Restartable volume snapshotter proxy for implementation `name`.
    pub async fn volume_snapshotter(&self, name: &str) -> Result<RestartableVolumeSnapshotter> {
        let process = self.process_for(name).await?;
        RestartableVolumeSnapshotter::new(name, process).await
    }

    /// Restartable backup item action proxy for implementation `name`.
    pub async fn backup_item_action(&self, name: &str) -> Result<RestartableBackupItemAction> {
        let process = self.process_for(name).await?;
        RestartableBackupItemAction::new(name, process).await
    }

    /// Shut down every supervised plugin process. The manager can still
    /// hand out proxies afterwards; they get fresh processes.
    pub async fn shutdown(&self) {
        let processes: Vec<Arc<RestartableProcess>> =
            self.processes.lock().await.drain().map(|(_, p)| p).collect();
        for process in processes {
            process.shutdown().await;
        }
    }

    fn executable_for(&self, name: &str) -> PathBuf {
        self.config
            .plugin_dir
            .join(format!("{}-{}", self.config.executable_prefix, name))
    }

    /// The shared supervisor for `name`'s executable, launching it on
    /// first use.
    async fn process_for(&self, name: &str) -> Result<Arc<RestartableProcess>> {
        let executable = self.executable_for(name);
        let mut processes = self.processes.lock().await;
        if let Some(process) = processes.get(&executable) {
            return Ok(process.clone());
        }

        debug!(executable = %executable.display(), "launching plugin process");
        let launcher = (self.factory)(executable.clone());
        let process = RestartableProcess::spawn(launcher).await?;
        processes.insert(executable, process.clone());
        Ok(process)
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
