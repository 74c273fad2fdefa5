//! Restartable object store proxy.
//!
//! [`RestartableObjectStore`] is the object store for a given
//! implementation (such as "aws"). It is associated with a shared
//! [`RestartableProcess`] that may run several plugins. At the beginning
//! of each method call the proxy asks the supervisor to restart the
//! process if needed (e.g. it terminated for any reason), then proceeds
//! with the actual call against the currently dispensed client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::Mutex;

use driftvault_plugin::object_store::CancellationToken;
use driftvault_plugin::{ObjectStore, PluginConfig, PluginError, PluginKey, PluginKind, Result};

use crate::client::PluginClient;
use crate::supervisor::{Reinitializer, RestartableProcess};

/// Typed stub forwarding [`ObjectStore`] calls over a dispensed client.
///
/// Object bodies travel base64-encoded inside the JSON params.
pub struct RemoteObjectStore {
    client: PluginClient,
}

impl RemoteObjectStore {
    pub(crate) fn new(client: PluginClient) -> Self {
        Self { client }
    }

    async fn call(
        &self,
        ctx: Option<&CancellationToken>,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        match ctx {
            Some(ctx) => self.client.call_ctx(ctx, method, params).await,
            None => self.client.call(method, params).await,
        }
    }

    async fn do_init(&self, ctx: Option<&CancellationToken>, config: &PluginConfig) -> Result<()> {
        self.call(ctx, "init", serde_json::json!({ "config": config }))
            .await?;
        Ok(())
    }

    async fn do_put(
        &self,
        ctx: Option<&CancellationToken>,
        bucket: &str,
        key: &str,
        body: &[u8],
    ) -> Result<()> {
        self.call(
            ctx,
            "put_object",
            serde_json::json!({
                "bucket": bucket,
                "key": key,
                "body": BASE64.encode(body),
            }),
        )
        .await?;
        Ok(())
    }

    async fn do_exists(
        &self,
        ctx: Option<&CancellationToken>,
        bucket: &str,
        key: &str,
    ) -> Result<bool> {
        let result = self
            .call(ctx, "object_exists", serde_json::json!({"bucket": bucket, "key": key}))
            .await?;
        result
            .get("exists")
            .and_then(|v| v.as_bool())
            .ok_or_else(|| PluginError::Protocol("object_exists: missing `exists`".into()))
    }

    async fn do_get(
        &self,
        ctx: Option<&CancellationToken>,
        bucket: &str,
        key: &str,
    ) -> Result<Vec<u8>> {
        let result = self
            .call(ctx, "get_object", serde_json::json!({"bucket": bucket, "key": key}))
            .await?;
        let body = result
            .get("body")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PluginError::Protocol("get_object: missing `body`".into()))?;
        BASE64
            .decode(body)
            .map_err(|e| PluginError::Protocol(format!("get_object: invalid base64 body: {e}")))
    }

    async fn do_list_prefixes(
        &self,
        ctx: Option<&CancellationToken>,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> Result<Vec<String>> {
        let result = self
            .call(
                ctx,
                "list_common_prefixes",
                serde_json::json!({"bucket": bucket, "prefix": prefix, "delimiter": delimiter}),
            )
            .await?;
        let prefixes = result
            .get("prefixes")
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Array(vec![]));
        Ok(serde_json::from_value(prefixes)?)
    }

    async fn do_list(
        &self,
        ctx: Option<&CancellationToken>,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<String>> {
        let result = self
            .call(ctx, "list_objects", serde_json::json!({"bucket": bucket, "prefix": prefix}))
            .await?;
        let keys = result
            .get("keys")
            .cloned()
            .unwrap_or_else(|| serde_json::Value::Array(vec![]));
        Ok(serde_json::from_value(keys)?)
    }

    async fn do_delete(
        &self,
        ctx: Option<&CancellationToken>,
        bucket: &str,
        key: &str,
    ) -> Result<()> {
        self.call(ctx, "delete_object", serde_json::json!({"bucket": bucket, "key": key}))
            .await?;
        Ok(())
    }

    async fn do_signed_url(
        &self,
        ctx: Option<&CancellationToken>,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String> {
        let result = self
            .call(
                ctx,
                "create_signed_url",
                serde_json::json!({"bucket": bucket, "key": key, "ttl_secs": ttl.as_secs()}),
            )
            .await?;
        result
            .get("url")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| PluginError::Protocol("create_signed_url: missing `url`".into()))
    }
}

#[async_trait]
impl ObjectStore for RemoteObjectStore {
    async fn init(&self, config: PluginConfig) -> Result<()> {
        self.do_init(None, &config).await
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        self.do_put(None, bucket, key, &body).await
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        self.do_exists(None, bucket, key).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.do_get(None, bucket, key).await
    }

    async fn list_common_prefixes(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> Result<Vec<String>> {
        self.do_list_prefixes(None, bucket, prefix, delimiter).await
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        self.do_list(None, bucket, prefix).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.do_delete(None, bucket, key).await
    }

    async fn create_signed_url(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String> {
        self.do_signed_url(None, bucket, key, ttl).await
    }

    async fn init_ctx(&self, ctx: &CancellationToken, config: PluginConfig) -> Result<()> {
        self.do_init(Some(ctx), &config).await
    }

    async fn put_object_ctx(
        &self,
        ctx: &CancellationToken,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> Result<()> {
        self.do_put(Some(ctx), bucket, key, &body).await
    }

    async fn object_exists_ctx(
        &self,
        ctx: &CancellationToken,
        bucket: &str,
        key: &str,
    ) -> Result<bool> {
        self.do_exists(Some(ctx), bucket, key).await
    }

    async fn get_object_ctx(
        &self,
        ctx: &CancellationToken,
        bucket: &str,
        key: &str,
    ) -> Result<Vec<u8>> {
        self.do_get(Some(ctx), bucket, key).await
    }

    async fn list_common_prefixes_ctx(
        &self,
        ctx: &CancellationToken,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> Result<Vec<String>> {
        self.do_list_prefixes(Some(ctx), bucket, prefix, delimiter).await
    }

    async fn list_objects_ctx(
        &self,
        ctx: &CancellationToken,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<String>> {
        self.do_list(Some(ctx), bucket, prefix).await
    }

    async fn delete_object_ctx(
        &self,
        ctx: &CancellationToken,
        bucket: &str,
        key: &str,
    ) -> Result<()> {
        self.do_delete(Some(ctx), bucket, key).await
    }

    async fn create_signed_url_ctx(
        &self,
        ctx: &CancellationToken,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String> {
        self.do_signed_url(Some(ctx), bucket, key, ttl).await
    }
}

/// Shared between the proxy and the supervisor's registry: the key plus
/// the configuration to replay after a restart. Registering this small
/// state object instead of the proxy itself keeps ownership acyclic.
struct ObjectStoreReinit {
    key: PluginKey,
    config: Mutex<Option<PluginConfig>>,
}

#[async_trait]
impl Reinitializer for ObjectStoreReinit {
    fn key(&self) -> &PluginKey {
        &self.key
    }

    async fn reinitialize(&self, client: PluginClient) -> Result<()> {
        let config = self
            .config
            .lock()
            .await
            .clone()
            .ok_or_else(|| PluginError::Reinitialize(self.key.clone()))?;
        RemoteObjectStore::new(client).init(config).await
    }
}

/// Restartable proxy implementing [`ObjectStore`] over a shared
/// supervised plugin process.
pub struct RestartableObjectStore {
    shared: Arc<ObjectStoreReinit>,
    process: Arc<RestartableProcess>,
}

impl RestartableObjectStore {
    /// Create the proxy for implementation `name` and register its
    /// reinitializer with the shared supervisor.
    pub async fn new(name: &str, process: Arc<RestartableProcess>) -> Result<Self> {
        let shared = Arc::new(ObjectStoreReinit {
            key: PluginKey::new(PluginKind::ObjectStore, name),
            config: Mutex::new(None),
        });
        process.register(shared.clone()).await?;
        Ok(Self { shared, process })
    }

    /// Restart the plugin process if needed, then return the stub for the
    /// current generation.
    async fn delegate(&self) -> Result<RemoteObjectStore> {
        self.process.ensure_live().await?;
        let client = self.process.get_client(&self.shared.key).await?;
        Ok(RemoteObjectStore::new(client))
    }

    /// Current stub without a liveness check. Used by `init`, which must
    /// not trigger the restart protocol while initializing for the first
    /// time.
    async fn current(&self) -> Result<RemoteObjectStore> {
        let client = self.process.get_client(&self.shared.key).await?;
        Ok(RemoteObjectStore::new(client))
    }

    async fn store_config_once(&self, config: &PluginConfig) -> Result<()> {
        let mut slot = self.shared.config.lock().await;
        if slot.is_some() {
            return Err(PluginError::AlreadyInitialized(self.shared.key.clone()));
        }
        *slot = Some(config.clone());
        Ok(())
    }
}

impl std::fmt::Debug for RestartableObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestartableObjectStore")
            .field("key", &self.shared.key)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ObjectStore for RestartableObjectStore {
    /// Initialize the plugin, storing `config` for reinitialization after
    /// any future restart. May only be called once per proxy instance,
    /// through either surface. The config is stored only after the client
    /// lookup succeeds (but before the forwarded RPC), so a failed
    /// dispense leaves the proxy retryable.
    async fn init(&self, config: PluginConfig) -> Result<()> {
        let delegate = self.current().await?;
        self.store_config_once(&config).await?;
        delegate.init(config).await
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()> {
        self.delegate().await?.put_object(bucket, key, body).await
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool> {
        self.delegate().await?.object_exists(bucket, key).await
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.delegate().await?.get_object(bucket, key).await
    }

    async fn list_common_prefixes(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> Result<Vec<String>> {
        self.delegate()
            .await?
            .list_common_prefixes(bucket, prefix, delimiter)
            .await
    }

    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>> {
        self.delegate().await?.list_objects(bucket, prefix).await
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.delegate().await?.delete_object(bucket, key).await
    }

    async fn create_signed_url(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String> {
        self.delegate()
            .await?
            .create_signed_url(bucket, key, ttl)
            .await
    }

    /// Identical behavior and one-shot guarantee as [`init`](Self::init);
    /// the two surfaces share the same stored configuration, so the
    /// context parameter is not consulted here.
    async fn init_ctx(&self, _ctx: &CancellationToken, config: PluginConfig) -> Result<()> {
        self.init(config).await
    }

    async fn put_object_ctx(
        &self,
        ctx: &CancellationToken,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> Result<()> {
        self.delegate()
            .await?
            .put_object_ctx(ctx, bucket, key, body)
            .await
    }

    async fn object_exists_ctx(
        &self,
        ctx: &CancellationToken,
        bucket: &str,
        key: &str,
    ) -> Result<bool> {
        self.delegate().await?.object_exists_ctx(ctx, bucket, key).await
    }

    async fn get_object_ctx(
        &self,
        ctx: &CancellationToken,
        bucket: &str,
        key: &str,
    ) -> Result<Vec<u8>> {
        self.delegate().await?.get_object_ctx(ctx, bucket, key).await
    }

    async fn list_common_prefixes_ctx(
        &self,
        ctx: &CancellationToken,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> Result<Vec<String>> {
        self.delegate()
            .await?
            .list_common_prefixes_ctx(ctx, bucket, prefix, delimiter)
            .await
    }

    async fn list_objects_ctx(
        &self,
        ctx: &CancellationToken,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<String>> {
        self.delegate().await?.list_objects_ctx(ctx, bucket, prefix).await
    }

    async fn delete_object_ctx(
        &self,
        ctx: &CancellationToken,
        bucket: &str,
        key: &str,
    ) -> Result<()> {
        self.delegate().await?.delete_object_ctx(ctx, bucket, key).await
    }

    async fn create_signed_url_ctx(
        &self,
        ctx: &CancellationToken,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String> {
        self.delegate()
            .await?
            .create_signed_url_ctx(ctx, bucket, key, ttl)
            .await
    }
}
