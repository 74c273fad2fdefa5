//! Volume snapshotter capability.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::kind::PluginConfig;

/// Provider-level description of a volume, returned by
/// [`VolumeSnapshotter::get_volume_info`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotVolumeInfo {
    /// Provider volume type (e.g. `gp3`).
    pub volume_type: String,
    /// Provisioned IOPS, when the volume type carries them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iops: Option<i64>,
}

/// Capability contract for volume-snapshotter plugins.
///
/// `init` follows the same one-shot rule as
/// [`ObjectStore::init`](crate::ObjectStore::init).
#[async_trait]
pub trait VolumeSnapshotter: Send + Sync {
    /// Initialize the snapshotter with provider configuration.
    /// May only be called once.
    async fn init(&self, config: PluginConfig) -> Result<()>;

    /// Snapshot a volume; returns the provider snapshot ID.
    async fn create_snapshot(
        &self,
        volume_id: &str,
        volume_az: &str,
        tags: HashMap<String, String>,
    ) -> Result<String>;

    /// Delete a snapshot.
    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<()>;

    /// Provision a new volume from a snapshot; returns the new volume ID.
    async fn create_volume_from_snapshot(
        &self,
        snapshot_id: &str,
        volume_type: &str,
        volume_az: &str,
        iops: Option<i64>,
    ) -> Result<String>;

    /// Look up provider-level details for a volume.
    async fn get_volume_info(&self, volume_id: &str, volume_az: &str)
    -> Result<SnapshotVolumeInfo>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_info_serde_skips_missing_iops() {
        let info = SnapshotVolumeInfo {
            volume_type: "gp3".into(),
            iops: None,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(!json.contains("iops"));

        let restored: SnapshotVolumeInfo =
            serde_json::from_str(r#"{"volume_type":"io1","iops":3000}"#).unwrap();
        assert_eq!(restored.volume_type, "io1");
        assert_eq!(restored.iops, Some(3000));
    }
}
