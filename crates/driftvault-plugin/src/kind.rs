//! Plugin kinds, registry keys, and init configuration.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Configuration passed to a plugin's `init` call.
///
/// A flat string map, e.g. `{"bucket": "backups", "region": "us-east-1"}`.
/// The restartable proxies store the map accepted by the first successful
/// `init` and replay it verbatim after a process restart.
pub type PluginConfig = HashMap<String, String>;

/// Capability category of a plugin.
///
/// One plugin executable may serve several kinds; each kind dispenses its
/// own client stub over the shared process connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginKind {
    /// Object storage: put/get/list/delete backup objects in a bucket.
    ObjectStore,
    /// Volume snapshots: create, delete, and restore from snapshots.
    VolumeSnapshotter,
    /// Per-item hook invoked while backing up cluster resources.
    BackupItemAction,
}

impl PluginKind {
    /// Wire name of the kind, used to namespace RPC methods
    /// (e.g. `object_store/put_object`).
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginKind::ObjectStore => "object_store",
            PluginKind::VolumeSnapshotter => "volume_snapshotter",
            PluginKind::BackupItemAction => "backup_item_action",
        }
    }
}

impl fmt::Display for PluginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registry key identifying one plugin implementation: a capability kind
/// plus an implementation name (e.g. `object_store/"aws"`).
///
/// Unique per supervised process; used as the index into the dispensed
/// client cache and the reinitializer registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PluginKey {
    /// Capability category.
    pub kind: PluginKind,
    /// Implementation identifier, typically a provider name.
    pub name: String,
}

impl PluginKey {
    /// Create a key from a kind and implementation name.
    pub fn new(kind: PluginKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for PluginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}
