//! Plugin capability trait definitions for driftvault.
//!
//! driftvault extends its backup/restore orchestrator through out-of-process
//! plugins: independently executable programs that the orchestrator launches
//! as child processes and talks to over a private RPC channel. This crate
//! defines the capability contracts those plugins implement, one trait per
//! plugin kind:
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`ObjectStore`] | Reads and writes backup objects in a bucket |
//! | [`VolumeSnapshotter`] | Creates and restores volume snapshots |
//! | [`BackupItemAction`] | Mutates individual items during a backup |
//!
//! The traits are implemented both by the remote stubs in
//! `driftvault-clientmgmt` (which forward calls over RPC to a live plugin
//! process) and by the restartable proxies layered on top of them. Callers
//! in the orchestration layer only ever see these traits.
//!
//! [`ObjectStore`] carries two interface generations: a context-free legacy
//! surface and a context-aware surface whose methods take a
//! [`CancellationToken`](object_store::CancellationToken). Both are backed
//! by the same one-shot `init` configuration.

pub mod error;
pub mod item_action;
pub mod kind;
pub mod object_store;
pub mod snapshotter;

pub use error::{PluginError, Result};
pub use item_action::{BackupItemAction, ItemActionResult, ResourceIdentifier, ResourceSelector};
pub use kind::{PluginConfig, PluginKey, PluginKind};
pub use object_store::ObjectStore;
pub use snapshotter::{SnapshotVolumeInfo, VolumeSnapshotter};
