//! Client-side plugin management for driftvault.
//!
//! Out-of-process plugins extend the backup orchestrator with object
//! stores, volume snapshotters, and backup item actions. This crate owns
//! the client side of that arrangement: launching plugin executables,
//! speaking JSON-RPC to them over stdio, supervising their processes, and
//! exposing each capability behind a restartable proxy that survives
//! plugin crashes transparently.
//!
//! Start with [`Manager`]: it resolves implementation names to
//! executables, keeps one supervised process per executable, and hands
//! out the proxies. The proxies check process liveness before every
//! forwarded call; a dead process is relaunched and every client
//! re-dispensed and re-initialized before any call resumes.

pub mod client;
#[cfg(test)]
mod fake;
pub mod manager;
pub mod process;
pub mod restartable;
pub mod supervisor;
pub mod transport;
pub mod wire;

pub use client::PluginClient;
pub use manager::{Manager, ManagerConfig};
pub use process::{PLUGIN_PROTOCOL_VERSION, PluginLauncher, PluginProcess, StdioLauncher};
pub use restartable::{
    RestartableBackupItemAction, RestartableObjectStore, RestartableVolumeSnapshotter,
};
pub use supervisor::{Reinitializer, RestartableProcess};
pub use transport::{PluginTransport, StdioTransport};
