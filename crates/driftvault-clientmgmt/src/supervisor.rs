//! Restartable plugin process supervision.
//!
//! [`RestartableProcess`] owns one plugin process handle and the registry
//! of every client dispensed against it. Exactly one supervisor exists per
//! plugin executable; proxies of different kinds served by the same
//! executable share it. When the process is found dead, the supervisor
//! runs the restart protocol: terminate, relaunch, re-dispense every
//! registered key, and replay each key's stored configuration through its
//! [`Reinitializer`] -- all before any ordinary call resumes.
//!
//! All state (process handle, generation counter, dispensed-client cache,
//! reinitializer registry) lives behind a single async mutex. Concurrent
//! `ensure_live` calls against a dead process therefore collapse into one
//! restart: the first caller relaunches while the rest wait on the lock,
//! then observe the new generation alive and return without side effects.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use driftvault_plugin::{PluginError, PluginKey, Result};

use crate::client::{PluginClient, dispense};
use crate::process::{PluginLauncher, PluginProcess};

/// Replays stored configuration against a freshly dispensed client after
/// a process restart. Every restartable proxy registers one of these at
/// construction time.
#[async_trait]
pub trait Reinitializer: Send + Sync {
    /// The registry key this reinitializer is responsible for.
    fn key(&self) -> &PluginKey;

    /// Reinitialize a re-dispensed client with the configuration accepted
    /// by the proxy's original `init`. Fails with
    /// [`PluginError::Reinitialize`] when the proxy was registered but
    /// never initialized and its kind requires configuration.
    async fn reinitialize(&self, client: PluginClient) -> Result<()>;
}

struct SupervisorState {
    /// Current process handle; `None` between a detected death and the
    /// next successful relaunch.
    process: Option<PluginProcess>,
    /// Monotonic incarnation counter, starting at 1 for the initial launch.
    generation: u64,
    /// Clients dispensed against the current generation.
    clients: HashMap<PluginKey, PluginClient>,
    /// Reinitializers in registration order.
    reinitializers: Vec<Arc<dyn Reinitializer>>,
    /// Keys whose reinitialization has not yet completed for the current
    /// generation, in registration order. Non-empty only after a restart
    /// failed partway; drained before ordinary calls resume.
    pending_reinit: Vec<PluginKey>,
    /// Set on shutdown; terminal.
    stopped: bool,
}

impl SupervisorState {
    fn is_registered(&self, key: &PluginKey) -> bool {
        self.reinitializers.iter().any(|r| r.key() == key)
    }
}

/// Supervisor for one plugin executable's process.
///
/// Construct once per executable with [`spawn`](Self::spawn) and share by
/// `Arc` among the proxies dispensed from it.
pub struct RestartableProcess {
    launcher: Arc<dyn PluginLauncher>,
    state: Mutex<SupervisorState>,
}

impl RestartableProcess {
    /// Launch the plugin process and wrap it in a supervisor.
    ///
    /// The initial launch happens here so that proxies can be constructed
    /// and initialized against a live process without going through the
    /// restart protocol.
    pub async fn spawn(launcher: Arc<dyn PluginLauncher>) -> Result<Arc<Self>> {
        let process = launcher.launch().await?;
        info!(
            executable = process.executable(),
            pid = process.pid(),
            "plugin process launched"
        );
        Ok(Arc::new(Self {
            launcher,
            state: Mutex::new(SupervisorState {
                process: Some(process),
                generation: 1,
                clients: HashMap::new(),
                reinitializers: Vec::new(),
                pending_reinit: Vec::new(),
                stopped: false,
            }),
        }))
    }

    /// Register a proxy's reinitializer. Called exactly once per proxy at
    /// construction; fails with [`PluginError::DuplicateKey`] on repeats.
    pub async fn register(&self, reinitializer: Arc<dyn Reinitializer>) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.stopped {
            return Err(PluginError::Stopped);
        }
        let key = reinitializer.key().clone();
        if state.is_registered(&key) {
            return Err(PluginError::DuplicateKey(key));
        }
        state.reinitializers.push(reinitializer);
        Ok(())
    }

    /// Return the client for `key` against the current generation,
    /// dispensing it lazily on first use after a launch or restart.
    ///
    /// Does not check process liveness; callers other than first-time
    /// `init` go through [`ensure_live`](Self::ensure_live) first.
    pub async fn get_client(&self, key: &PluginKey) -> Result<PluginClient> {
        let mut state = self.state.lock().await;
        if state.stopped {
            return Err(PluginError::Stopped);
        }
        if !state.is_registered(key) {
            return Err(PluginError::UnknownKey(key.clone()));
        }
        if let Some(client) = state.clients.get(key) {
            return Ok(client.clone());
        }

        let process = state
            .process
            .as_ref()
            .ok_or_else(|| PluginError::Transport("plugin process is not running".into()))?
            .clone();
        let client = dispense(&process, key, state.generation).await?;
        state.clients.insert(key.clone(), client.clone());
        Ok(client)
    }

    /// Non-dispensing lookup: the client for `key` if one has already been
    /// dispensed for the current generation. [`PluginError::NotDispensed`]
    /// otherwise.
    pub async fn dispensed_client(&self, key: &PluginKey) -> Result<PluginClient> {
        let state = self.state.lock().await;
        if state.stopped {
            return Err(PluginError::Stopped);
        }
        if !state.is_registered(key) {
            return Err(PluginError::UnknownKey(key.clone()));
        }
        state
            .clients
            .get(key)
            .cloned()
            .ok_or_else(|| PluginError::NotDispensed(key.clone()))
    }

    /// Current process generation. Strictly increasing across restarts.
    pub async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }

    /// Return immediately if the process is alive and fully reinitialized;
    /// otherwise run the restart protocol. Safe under concurrent callers:
    /// at most one restart executes per dead-process event, and waiters
    /// proceed against the new generation once it is published.
    pub async fn ensure_live(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.stopped {
            return Err(PluginError::Stopped);
        }

        let alive = state.process.as_ref().is_some_and(|p| p.is_alive());
        if alive && state.pending_reinit.is_empty() {
            return Ok(());
        }

        if alive {
            // A previous restart advanced the generation but failed during
            // reinitialization; finish the remaining keys without another
            // relaunch.
            self.reinitialize_pending(&mut state).await
        } else {
            self.restart(&mut state).await
        }
    }

    /// Terminate the process permanently. Every subsequent operation on
    /// this supervisor fails with [`PluginError::Stopped`].
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        state.stopped = true;
        state.clients.clear();
        state.pending_reinit.clear();
        if let Some(process) = state.process.take() {
            info!(
                executable = process.executable(),
                pid = process.pid(),
                "shutting down plugin process"
            );
            process.terminate().await;
        }
    }

    /// The restart protocol. Runs with the state lock held, so no ordinary
    /// operation can observe a generation whose registered keys are not
    /// yet reinitialized.
    async fn restart(&self, state: &mut SupervisorState) -> Result<()> {
        // Tear down the dead handle. Best-effort: it may already be gone.
        if let Some(process) = state.process.take() {
            warn!(
                executable = process.executable(),
                pid = process.pid(),
                generation = state.generation,
                "plugin process found dead, restarting"
            );
            process.terminate().await;
        }
        state.clients.clear();

        let process = match self.launcher.launch().await {
            Ok(process) => process,
            Err(e) => {
                // The old generation stays torn down; the next ensure_live
                // retries from scratch.
                warn!(error = %e, "plugin relaunch failed");
                return Err(PluginError::Restart(format!("launch: {e}")));
            }
        };

        state.generation += 1;
        info!(
            executable = process.executable(),
            pid = process.pid(),
            generation = state.generation,
            "plugin process restarted"
        );
        state.process = Some(process);
        state.pending_reinit = state
            .reinitializers
            .iter()
            .map(|r| r.key().clone())
            .collect();

        self.reinitialize_pending(state).await
    }

    /// Re-dispense and reinitialize every pending key in registration
    /// order. On failure the failed key stays at the head of the pending
    /// list; a later `ensure_live` retries it with a fresh dispense.
    async fn reinitialize_pending(&self, state: &mut SupervisorState) -> Result<()> {
        while let Some(key) = state.pending_reinit.first().cloned() {
            let reinitializer = state
                .reinitializers
                .iter()
                .find(|r| *r.key() == key)
                .cloned()
                .ok_or_else(|| PluginError::Restart(format!("no reinitializer for {key}")))?;
            let process = state
                .process
                .as_ref()
                .ok_or_else(|| PluginError::Restart("process vanished mid-restart".into()))?
                .clone();

            let client = dispense(&process, &key, state.generation)
                .await
                .map_err(|e| PluginError::Restart(format!("re-dispense {key}: {e}")))?;
            state.clients.insert(key.clone(), client.clone());

            reinitializer
                .reinitialize(client)
                .await
                .map_err(|e| PluginError::Restart(format!("reinitialize {key}: {e}")))?;

            state.pending_reinit.remove(0);
        }
        Ok(())
    }
}

impl std::fmt::Debug for RestartableProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestartableProcess").finish_non_exhaustive()
    }
}
