//! Backup item action capability.
//!
//! Item actions are per-resource hooks invoked while the orchestrator
//! walks cluster resources during a backup: they can mutate the item
//! being backed up and request additional related items. Unlike object
//! stores and snapshotters, item actions carry no `init` configuration;
//! after a process restart they only need to be re-dispensed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which resources an item action wants to see.
///
/// Empty lists mean "no constraint on that axis".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSelector {
    /// Resource types to include (e.g. `pods`, `persistentvolumes`).
    #[serde(default)]
    pub included_resources: Vec<String>,
    /// Namespaces to include.
    #[serde(default)]
    pub included_namespaces: Vec<String>,
    /// Label selector expression, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<String>,
}

/// Reference to a cluster resource an action wants added to the backup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    /// Resource type (e.g. `persistentvolumeclaims`).
    pub resource: String,
    /// Namespace; empty for cluster-scoped resources.
    #[serde(default)]
    pub namespace: String,
    /// Resource name.
    pub name: String,
}

/// Outcome of executing an item action against one item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemActionResult {
    /// The (possibly mutated) item to store in the backup.
    pub updated_item: serde_json::Value,
    /// Related items the orchestrator should also back up.
    #[serde(default)]
    pub additional_items: Vec<ResourceIdentifier>,
}

/// Capability contract for backup-item-action plugins.
#[async_trait]
pub trait BackupItemAction: Send + Sync {
    /// Report which resources this action should be invoked for.
    async fn applies_to(&self) -> Result<ResourceSelector>;

    /// Execute the action against one item. `item` and `backup` are the
    /// raw JSON representations owned by the orchestration layer.
    async fn execute(
        &self,
        item: serde_json::Value,
        backup: serde_json::Value,
    ) -> Result<ItemActionResult>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_defaults_are_unconstrained() {
        let selector: ResourceSelector = serde_json::from_str("{}").unwrap();
        assert!(selector.included_resources.is_empty());
        assert!(selector.included_namespaces.is_empty());
        assert!(selector.label_selector.is_none());
    }

    #[test]
    fn result_roundtrip() {
        let result = ItemActionResult {
            updated_item: serde_json::json!({"kind": "Pod", "metadata": {"name": "web"}}),
            additional_items: vec![ResourceIdentifier {
                resource: "persistentvolumeclaims".into(),
                namespace: "default".into(),
                name: "web-data".into(),
            }],
        };
        let json = serde_json::to_string(&result).unwrap();
        let restored: ItemActionResult = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.additional_items, result.additional_items);
        assert_eq!(restored.updated_item["kind"], "Pod");
    }
}
