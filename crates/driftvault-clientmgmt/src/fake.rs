//! Scripted fakes for exercising the supervision layer without real
//! child processes: a transport with canned responses and liveness
//! switches, a launcher that counts launches and can be told to fail,
//! and reinitializers that record replay order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use driftvault_plugin::{PluginError, PluginKey, Result};

use crate::client::PluginClient;
use crate::process::{PluginLauncher, PluginProcess};
use crate::supervisor::Reinitializer;
use crate::transport::PluginTransport;
use crate::wire::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};

/// In-memory transport with scripted results and a liveness switch.
pub(crate) struct FakeTransport {
    alive: AtomicBool,
    terminated: AtomicBool,
    calls: Mutex<Vec<(String, serde_json::Value)>>,
    results: Mutex<HashMap<String, serde_json::Value>>,
    failures: Mutex<HashMap<String, String>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            alive: AtomicBool::new(true),
            terminated: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            results: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Script the result returned for `method`. Unknown methods get `{}`.
    pub fn set_result(&self, method: &str, result: serde_json::Value) {
        self.results.lock().unwrap().insert(method.into(), result);
    }

    /// Make `method` return a JSON-RPC error with the given message.
    pub fn fail_method(&self, method: &str, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert(method.into(), message.into());
    }

    /// Stop failing `method`.
    pub fn unfail_method(&self, method: &str) {
        self.failures.lock().unwrap().remove(method);
    }

    /// Simulate process death: subsequent requests fail and
    /// `is_alive` reports false.
    pub fn kill(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    pub fn terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// All requests sent so far, in order, as (method, params).
    pub fn calls(&self) -> Vec<(String, serde_json::Value)> {
        self.calls.lock().unwrap().clone()
    }

    /// The recorded calls whose method equals `method`.
    pub fn calls_named(&self, method: &str) -> Vec<(String, serde_json::Value)> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| m == method)
            .collect()
    }
}

#[async_trait]
impl PluginTransport for FakeTransport {
    async fn send_request(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse> {
        if !self.is_alive() {
            return Err(PluginError::Transport("plugin process is dead".into()));
        }
        self.calls
            .lock()
            .unwrap()
            .push((request.method.clone(), request.params.clone()));

        if let Some(message) = self.failures.lock().unwrap().get(&request.method) {
            return Ok(JsonRpcResponse {
                jsonrpc: "2.0".into(),
                id: request.id,
                result: None,
                error: Some(JsonRpcError {
                    code: -32000,
                    message: message.clone(),
                    data: None,
                }),
            });
        }

        let result = self
            .results
            .lock()
            .unwrap()
            .get(&request.method)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({}));
        Ok(JsonRpcResponse {
            jsonrpc: "2.0".into(),
            id: request.id,
            result: Some(result),
            error: None,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn terminate(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.terminated.store(true, Ordering::SeqCst);
    }
}

/// Launcher producing [`FakeTransport`]-backed processes. Counts launches
/// and can be told to fail the next N of them.
pub(crate) struct FakeLauncher {
    launches: AtomicUsize,
    fail_remaining: AtomicUsize,
    transports: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self {
            launches: AtomicUsize::new(0),
            fail_remaining: AtomicUsize::new(0),
            transports: Mutex::new(Vec::new()),
        }
    }

    /// Total `launch` invocations, including failed ones.
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Make the next `n` launches fail with a launch error.
    pub fn fail_next_launches(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// The transport backing the most recent successful launch.
    pub fn current_transport(&self) -> Arc<FakeTransport> {
        self.transports
            .lock()
            .unwrap()
            .last()
            .expect("no process launched yet")
            .clone()
    }
}

#[async_trait]
impl PluginLauncher for FakeLauncher {
    async fn launch(&self) -> Result<PluginProcess> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PluginError::Launch("scripted launch failure".into()));
        }

        let transport = Arc::new(FakeTransport::new());
        self.transports.lock().unwrap().push(transport.clone());
        Ok(PluginProcess::new(
            "fake-plugin",
            None,
            transport as Arc<dyn PluginTransport>,
        ))
    }
}

/// Reinitializer that accepts every replay without doing anything.
pub(crate) struct NoopReinitializer {
    key: PluginKey,
}

impl NoopReinitializer {
    pub fn new(key: PluginKey) -> Self {
        Self { key }
    }
}

#[async_trait]
impl Reinitializer for NoopReinitializer {
    fn key(&self) -> &PluginKey {
        &self.key
    }

    async fn reinitialize(&self, _client: PluginClient) -> Result<()> {
        Ok(())
    }
}

/// Reinitializer that records successful replays into a shared vector and
/// can be told to fail its next N attempts.
pub(crate) struct RecordingReinitializer {
    key: PluginKey,
    order: Arc<Mutex<Vec<PluginKey>>>,
    fail_remaining: AtomicUsize,
}

impl RecordingReinitializer {
    pub fn new(key: PluginKey, order: Arc<Mutex<Vec<PluginKey>>>) -> Self {
        Self {
            key,
            order,
            fail_remaining: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` reinitialize attempts fail.
    pub fn fail_times(&self, n: usize) {
        self.fail_remaining.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Reinitializer for RecordingReinitializer {
    fn key(&self) -> &PluginKey {
        &self.key
    }

    async fn reinitialize(&self, _client: PluginClient) -> Result<()> {
        if self
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PluginError::Reinitialize(self.key.clone()));
        }
        self.order.lock().unwrap().push(self.key.clone());
        Ok(())
    }
}
