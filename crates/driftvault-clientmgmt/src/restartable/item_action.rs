//! Restartable backup item action proxy.
//!
//! Item actions carry no configuration, so their reinitializer accepts
//! every replay: a restart only needs to re-dispense their client.

use std::sync::Arc;

use async_trait::async_trait;

use driftvault_plugin::{
    BackupItemAction, ItemActionResult, PluginError, PluginKey, PluginKind, ResourceSelector,
    Result,
};

use crate::client::PluginClient;
use crate::supervisor::{Reinitializer, RestartableProcess};

/// Typed stub forwarding [`BackupItemAction`] calls over a dispensed client.
pub struct RemoteBackupItemAction {
    client: PluginClient,
}

impl RemoteBackupItemAction {
    pub(crate) fn new(client: PluginClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BackupItemAction for RemoteBackupItemAction {
    async fn applies_to(&self) -> Result<ResourceSelector> {
        let result = self.client.call("applies_to", serde_json::json!({})).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn execute(
        &self,
        item: serde_json::Value,
        backup: serde_json::Value,
    ) -> Result<ItemActionResult> {
        let result = self
            .client
            .call("execute", serde_json::json!({"item": item, "backup": backup}))
            .await?;
        Ok(serde_json::from_value(result)?)
    }
}

/// Registration-only reinit state: there is no configuration to replay.
struct ItemActionReinit {
    key: PluginKey,
}

#[async_trait]
impl Reinitializer for ItemActionReinit {
    fn key(&self) -> &PluginKey {
        &self.key
    }

    async fn reinitialize(&self, _client: PluginClient) -> Result<()> {
        Ok(())
    }
}

/// Restartable proxy implementing [`BackupItemAction`] over a shared
/// supervised plugin process.
pub struct RestartableBackupItemAction {
    shared: Arc<ItemActionReinit>,
    process: Arc<RestartableProcess>,
}

impl RestartableBackupItemAction {
    /// Create the proxy for implementation `name` and register it with the
    /// shared supervisor so restarts re-dispense its client.
    pub async fn new(name: &str, process: Arc<RestartableProcess>) -> Result<Self> {
        let shared = Arc::new(ItemActionReinit {
            key: PluginKey::new(PluginKind::BackupItemAction, name),
        });
        process.register(shared.clone()).await?;
        Ok(Self { shared, process })
    }

    async fn delegate(&self) -> Result<RemoteBackupItemAction> {
        self.process.ensure_live().await?;
        let client = self.process.get_client(&self.shared.key).await?;
        Ok(RemoteBackupItemAction::new(client))
    }
}

impl std::fmt::Debug for RestartableBackupItemAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestartableBackupItemAction")
            .field("key", &self.shared.key)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl BackupItemAction for RestartableBackupItemAction {
    async fn applies_to(&self) -> Result<ResourceSelector> {
        self.delegate().await?.applies_to().await
    }

    async fn execute(
        &self,
        item: serde_json::Value,
        backup: serde_json::Value,
    ) -> Result<ItemActionResult> {
        self.delegate().await?.execute(item, backup).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::fake::FakeLauncher;

    #[tokio::test]
    async fn applies_to_decodes_selector() {
        let launcher = Arc::new(FakeLauncher::new());
        let process = RestartableProcess::spawn(launcher.clone()).await.unwrap();
        let action = RestartableBackupItemAction::new("pod-hook", process)
            .await
            .unwrap();

        launcher.current_transport().set_result(
            "backup_item_action/applies_to",
            serde_json::json!({
                "included_resources": ["pods"],
                "included_namespaces": ["default"],
            }),
        );

        let selector = action.applies_to().await.unwrap();
        assert_eq!(selector.included_resources, vec!["pods"]);
        assert_eq!(selector.included_namespaces, vec!["default"]);
        assert!(selector.label_selector.is_none());
    }

    #[tokio::test]
    async fn execute_forwards_item_and_backup() {
        let launcher = Arc::new(FakeLauncher::new());
        let process = RestartableProcess::spawn(launcher.clone()).await.unwrap();
        let action = RestartableBackupItemAction::new("pod-hook", process)
            .await
            .unwrap();

        let transport = launcher.current_transport();
        transport.set_result(
            "backup_item_action/execute",
            serde_json::json!({
                "updated_item": {"kind": "Pod"},
                "additional_items": [
                    {"resource": "persistentvolumeclaims", "namespace": "default", "name": "data"},
                ],
            }),
        );

        let result = action
            .execute(
                serde_json::json!({"kind": "Pod", "metadata": {"name": "web"}}),
                serde_json::json!({"metadata": {"name": "nightly"}}),
            )
            .await
            .unwrap();
        assert_eq!(result.updated_item["kind"], "Pod");
        assert_eq!(result.additional_items.len(), 1);
        assert_eq!(result.additional_items[0].name, "data");

        let calls = transport.calls_named("backup_item_action/execute");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1["item"]["metadata"]["name"], "web");
        assert_eq!(calls[0].1["backup"]["metadata"]["name"], "nightly");
        assert_eq!(calls[0].1["plugin"], "pod-hook");
    }

    #[tokio::test]
    async fn restart_without_config_still_works() {
        let launcher = Arc::new(FakeLauncher::new());
        let process = RestartableProcess::spawn(launcher.clone()).await.unwrap();
        let action = RestartableBackupItemAction::new("pod-hook", process)
            .await
            .unwrap();

        // Exercise once so the client is dispensed on generation 1.
        action.applies_to().await.unwrap();
        launcher.current_transport().kill();

        // No stored configuration: the restart only re-dispenses.
        let selector = action.applies_to().await.unwrap();
        assert_eq!(selector, ResourceSelector::default());
        assert_eq!(launcher.launch_count(), 2);

        let methods: Vec<String> = launcher
            .current_transport()
            .calls()
            .into_iter()
            .map(|(m, _)| m)
            .collect();
        assert_eq!(
            methods,
            vec!["plugin/dispense", "backup_item_action/applies_to"]
        );
    }

    #[tokio::test]
    async fn malformed_result_is_a_protocol_error() {
        let launcher = Arc::new(FakeLauncher::new());
        let process = RestartableProcess::spawn(launcher.clone()).await.unwrap();
        let action = RestartableBackupItemAction::new("pod-hook", process)
            .await
            .unwrap();

        // `execute` requires `updated_item`; the default `{}` result lacks it.
        let err = action
            .execute(serde_json::json!({}), serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, PluginError::Json(_)));
    }
}
