//! Dispensed plugin client stubs.
//!
//! [`dispense`] obtains a [`PluginClient`] for one (kind, name) key against
//! a live process connection. The client is a pure stub: it namespaces
//! method names by kind, injects the plugin name into every call, and maps
//! RPC errors into [`PluginError`]. It carries the process generation it
//! was dispensed against, and must never be used once the supervisor has
//! published a newer generation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use driftvault_plugin::{PluginError, PluginKey, Result};

use crate::process::PluginProcess;
use crate::transport::PluginTransport;
use crate::wire::JsonRpcRequest;

/// Typed RPC stub for one plugin key against one process generation.
#[derive(Clone)]
pub struct PluginClient {
    key: PluginKey,
    generation: u64,
    transport: Arc<dyn PluginTransport>,
    request_ids: Arc<AtomicU64>,
}

impl PluginClient {
    /// Key this client was dispensed for.
    pub fn key(&self) -> &PluginKey {
        &self.key
    }

    /// Process generation this client was dispensed against. The client
    /// is valid only while this equals the supervisor's current generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Invoke a kind-namespaced method on the plugin, e.g. `call("put_object", ...)`
    /// for an object-store client sends `object_store/put_object`. The plugin
    /// implementation name is injected into the params as `"plugin"`.
    pub async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value> {
        let method = format!("{}/{}", self.key.kind.as_str(), method);
        let params = self.tag_params(params)?;
        self.request(method, params).await
    }

    /// Like [`call`](Self::call), but aborts with [`PluginError::Cancelled`]
    /// when `ctx` fires. Cancellation affects only this call's outstanding
    /// invocation; the process and other callers are untouched.
    pub async fn call_ctx(
        &self,
        ctx: &CancellationToken,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(PluginError::Cancelled),
            result = self.call(method, params) => result,
        }
    }

    /// Send an un-namespaced request (handshake/dispense plumbing).
    async fn request(&self, method: String, params: serde_json::Value) -> Result<serde_json::Value> {
        let id = self.request_ids.fetch_add(1, Ordering::Relaxed);
        let response = self
            .transport
            .send_request(JsonRpcRequest::new(id, method, params))
            .await?;

        if let Some(err) = response.error {
            return Err(PluginError::Protocol(format!(
                "code={}, message={}",
                err.code, err.message
            )));
        }
        response
            .result
            .ok_or_else(|| PluginError::Protocol("empty result".into()))
    }

    fn tag_params(&self, params: serde_json::Value) -> Result<serde_json::Value> {
        let mut map = match params {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => serde_json::Map::new(),
            other => {
                return Err(PluginError::Protocol(format!(
                    "plugin call params must be an object, got {other}"
                )));
            }
        };
        map.insert(
            "plugin".into(),
            serde_json::Value::String(self.key.name.clone()),
        );
        Ok(serde_json::Value::Object(map))
    }
}

impl std::fmt::Debug for PluginClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginClient")
            .field("key", &self.key)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Dispense a client stub for `key` against the process's current connection.
///
/// Pure function of (live connection, key): performs the `plugin/dispense`
/// RPC so the plugin can verify it serves this kind and name, then returns
/// the stub. No caching happens here; the supervisor owns the registry.
pub(crate) async fn dispense(
    process: &PluginProcess,
    key: &PluginKey,
    generation: u64,
) -> Result<PluginClient> {
    let client = PluginClient {
        key: key.clone(),
        generation,
        transport: process.transport(),
        request_ids: process.request_ids(),
    };

    let params = serde_json::json!({
        "kind": key.kind.as_str(),
        "name": key.name,
    });
    client
        .request("plugin/dispense".into(), params)
        .await
        .map_err(|e| PluginError::Dispense {
            key: key.clone(),
            reason: e.to_string(),
        })?;

    debug!(key = %key, generation, "dispensed plugin client");
    Ok(client)
}
