//! Restartable proxies, one per plugin kind.
//!
//! Each proxy pairs a remote stub (typed RPC calls over a dispensed
//! [`PluginClient`](crate::client::PluginClient)) with a restartable
//! façade that asks the shared supervisor to ensure the process is live
//! before every forwarded call. Proxies register their reinitialization
//! state with the supervisor at construction, so a restart replays their
//! stored configuration before any call resumes.

pub mod item_action;
pub mod object_store;
pub mod snapshotter;

pub use item_action::RestartableBackupItemAction;
pub use object_store::RestartableObjectStore;
pub use snapshotter::RestartableVolumeSnapshotter;
