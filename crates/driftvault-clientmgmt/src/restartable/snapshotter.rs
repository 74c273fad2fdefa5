//! Restartable volume snapshotter proxy.
//!
//! Same pattern as the object store proxy: ensure the shared process is
//! live, then forward to the currently dispensed client. The snapshotter
//! only carries the legacy (context-free) surface.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use driftvault_plugin::{
    PluginConfig, PluginError, PluginKey, PluginKind, Result, SnapshotVolumeInfo,
    VolumeSnapshotter,
};

use crate::client::PluginClient;
use crate::supervisor::{Reinitializer, RestartableProcess};

/// Typed stub forwarding [`VolumeSnapshotter`] calls over a dispensed client.
pub struct RemoteVolumeSnapshotter {
    client: PluginClient,
}

impl RemoteVolumeSnapshotter {
    pub(crate) fn new(client: PluginClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VolumeSnapshotter for RemoteVolumeSnapshotter {
    async fn init(&self, config: PluginConfig) -> Result<()> {
        self.client
            .call("init", serde_json::json!({ "config": config }))
            .await?;
        Ok(())
    }

    async fn create_snapshot(
        &self,
        volume_id: &str,
        volume_az: &str,
        tags: HashMap<String, String>,
    ) -> Result<String> {
        let result = self
            .client
            .call(
                "create_snapshot",
                serde_json::json!({
                    "volume_id": volume_id,
                    "volume_az": volume_az,
                    "tags": tags,
                }),
            )
            .await?;
        result
            .get("snapshot_id")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| PluginError::Protocol("create_snapshot: missing `snapshot_id`".into()))
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.client
            .call("delete_snapshot", serde_json::json!({"snapshot_id": snapshot_id}))
            .await?;
        Ok(())
    }

    async fn create_volume_from_snapshot(
        &self,
        snapshot_id: &str,
        volume_type: &str,
        volume_az: &str,
        iops: Option<i64>,
    ) -> Result<String> {
        let result = self
            .client
            .call(
                "create_volume_from_snapshot",
                serde_json::json!({
                    "snapshot_id": snapshot_id,
                    "volume_type": volume_type,
                    "volume_az": volume_az,
                    "iops": iops,
                }),
            )
            .await?;
        result
            .get("volume_id")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                PluginError::Protocol("create_volume_from_snapshot: missing `volume_id`".into())
            })
    }

    async fn get_volume_info(
        &self,
        volume_id: &str,
        volume_az: &str,
    ) -> Result<SnapshotVolumeInfo> {
        let result = self
            .client
            .call(
                "get_volume_info",
                serde_json::json!({"volume_id": volume_id, "volume_az": volume_az}),
            )
            .await?;
        Ok(serde_json::from_value(result)?)
    }
}

/// Key plus replayable configuration, shared with the supervisor registry.
struct SnapshotterReinit {
    key: PluginKey,
    config: Mutex<Option<PluginConfig>>,
}

#[async_trait]
impl Reinitializer for SnapshotterReinit {
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
        RemoteVolumeSnapshotter::new(client).init(config).await
    }
}

/// Restartable proxy implementing [`VolumeSnapshotter`] over a shared
/// supervised plugin process.
pub struct RestartableVolumeSnapshotter {
    shared: Arc<SnapshotterReinit>,
    process: Arc<RestartableProcess>,
}

impl RestartableVolumeSnapshotter {
    /// Create the proxy for implementation `name` and register its
    /// reinitializer with the shared supervisor.
    pub async fn new(name: &str, process: Arc<RestartableProcess>) -> Result<Self> {
        let shared = Arc::new(SnapshotterReinit {
            key: PluginKey::new(PluginKind::VolumeSnapshotter, name),
            config: Mutex::new(None),
        });
        process.register(shared.clone()).await?;
        Ok(Self { shared, process })
    }

    async fn delegate(&self) -> Result<RemoteVolumeSnapshotter> {
        self.process.ensure_live().await?;
        let client = self.process.get_client(&self.shared.key).await?;
        Ok(RemoteVolumeSnapshotter::new(client))
    }
}

impl std::fmt::Debug for RestartableVolumeSnapshotter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestartableVolumeSnapshotter")
            .field("key", &self.shared.key)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl VolumeSnapshotter for RestartableVolumeSnapshotter {
    /// One-shot init; stores `config` for replay after restarts. Skips the
    /// liveness check to avoid restarting while initializing for the
    /// first time, and stores the config only once the client lookup
    /// succeeds so a failed dispense leaves the proxy retryable.
    async fn init(&self, config: PluginConfig) -> Result<()> {
        let client = self.process.get_client(&self.shared.key).await?;
        {
            let mut slot = self.shared.config.lock().await;
            if slot.is_some() {
                return Err(PluginError::AlreadyInitialized(self.shared.key.clone()));
            }
            *slot = Some(config.clone());
        }
        RemoteVolumeSnapshotter::new(client).init(config).await
    }

    async fn create_snapshot(
        &self,
        volume_id: &str,
        volume_az: &str,
        tags: HashMap<String, String>,
    ) -> Result<String> {
        self.delegate()
            .await?
            .create_snapshot(volume_id, volume_az, tags)
            .await
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()> {
        self.delegate().await?.delete_snapshot(snapshot_id).await
    }

    async fn create_volume_from_snapshot(
        &self,
        snapshot_id: &str,
        volume_type: &str,
        volume_az: &str,
        iops: Option<i64>,
    ) -> Result<String> {
        self.delegate()
            .await?
            .create_volume_from_snapshot(snapshot_id, volume_type, volume_az, iops)
            .await
    }

    async fn get_volume_info(
        &self,
        volume_id: &str,
        volume_az: &str,
    ) -> Result<SnapshotVolumeInfo> {
        self.delegate()
            .await?
            .get_volume_info(volume_id, volume_az)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::fake::FakeLauncher;

    fn config() -> PluginConfig {
        PluginConfig::from([("region".to_string(), "us-east-1".to_string())])
    }

    #[tokio::test]
    async fn init_is_one_shot() {
        let launcher = Arc::new(FakeLauncher::new());
        let process = RestartableProcess::spawn(launcher).await.unwrap();
        let snapshotter = RestartableVolumeSnapshotter::new("ebs", process)
            .await
            .unwrap();

        snapshotter.init(config()).await.unwrap();
        let err = snapshotter.init(config()).await.unwrap_err();
        assert!(matches!(err, PluginError::AlreadyInitialized(_)));
    }

    #[tokio::test]
    async fn init_can_be_retried_after_a_failed_dispense() {
        let launcher = Arc::new(FakeLauncher::new());
        let process = RestartableProcess::spawn(launcher.clone()).await.unwrap();
        let snapshotter = RestartableVolumeSnapshotter::new("ebs", process)
            .await
            .unwrap();

        let transport = launcher.current_transport();
        transport.fail_method("plugin/dispense", "not ready");
        let err = snapshotter.init(config()).await.unwrap_err();
        assert!(matches!(err, PluginError::Dispense { .. }));

        transport.unfail_method("plugin/dispense");
        snapshotter.init(config()).await.unwrap();
        assert_eq!(transport.calls_named("volume_snapshotter/init").len(), 1);
    }

    #[tokio::test]
    async fn restart_replays_config_before_forwarding() {
        let launcher = Arc::new(FakeLauncher::new());
        let process = RestartableProcess::spawn(launcher.clone()).await.unwrap();
        let snapshotter = RestartableVolumeSnapshotter::new("ebs", process)
            .await
            .unwrap();
        snapshotter.init(config()).await.unwrap();

        launcher.current_transport().kill();

        let transport_result = snapshotter.delete_snapshot("snap-1").await;
        transport_result.unwrap();

        let calls = launcher.current_transport().calls();
        let methods: Vec<&str> = calls.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(
            methods,
            vec![
                "plugin/dispense",
                "volume_snapshotter/init",
                "volume_snapshotter/delete_snapshot",
            ]
        );
        assert_eq!(calls[1].1["config"]["region"], "us-east-1");
    }

    #[tokio::test]
    async fn typed_results_decode() {
        let launcher = Arc::new(FakeLauncher::new());
        let process = RestartableProcess::spawn(launcher.clone()).await.unwrap();
        let snapshotter = RestartableVolumeSnapshotter::new("ebs", process)
            .await
            .unwrap();
        snapshotter.init(config()).await.unwrap();

        let transport = launcher.current_transport();
        transport.set_result(
            "volume_snapshotter/create_snapshot",
            serde_json::json!({"snapshot_id": "snap-9"}),
        );
        transport.set_result(
            "volume_snapshotter/create_volume_from_snapshot",
            serde_json::json!({"volume_id": "vol-3"}),
        );
        transport.set_result(
            "volume_snapshotter/get_volume_info",
            serde_json::json!({"volume_type": "gp3", "iops": 3000}),
        );

        let snapshot_id = snapshotter
            .create_snapshot("vol-1", "us-east-1a", HashMap::new())
            .await
            .unwrap();
        assert_eq!(snapshot_id, "snap-9");

        let volume_id = snapshotter
            .create_volume_from_snapshot("snap-9", "gp3", "us-east-1a", None)
            .await
            .unwrap();
        assert_eq!(volume_id, "vol-3");

        let info = snapshotter
            .get_volume_info("vol-3", "us-east-1a")
            .await
            .unwrap();
        assert_eq!(info.volume_type, "gp3");
        assert_eq!(info.iops, Some(3000));
    }
}
