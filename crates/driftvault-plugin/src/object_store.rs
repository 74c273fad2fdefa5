//! Object store capability.
//!
//! Object stores hold the backup archives themselves: tarballs, metadata
//! files, and logs, addressed by bucket and key. Two interface generations
//! coexist. The legacy surface has no cancellation parameter; the
//! context-aware surface takes a [`CancellationToken`] that aborts only
//! that call's outstanding remote invocation, never the shared process or
//! its restart protocol.

use std::time::Duration;

use async_trait::async_trait;

pub use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::kind::PluginConfig;

/// Capability contract for object-store plugins.
///
/// `init` is one-shot: exactly one successful call per instance, through
/// either surface. A second call fails with
/// [`AlreadyInitialized`](crate::PluginError::AlreadyInitialized) and has
/// no side effects. All other operations require a prior `init`.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Initialize the store with provider configuration
    /// (bucket, region, credentials profile, ...). May only be called once.
    async fn init(&self, config: PluginConfig) -> Result<()>;

    /// Write an object.
    async fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<()>;

    /// Check whether an object exists.
    async fn object_exists(&self, bucket: &str, key: &str) -> Result<bool>;

    /// Read an object's contents.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// List the common prefixes under `prefix`, splitting on `delimiter`.
    async fn list_common_prefixes(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> Result<Vec<String>>;

    /// List object keys under `prefix`.
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<String>>;

    /// Delete an object.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    /// Create a pre-signed URL for downloading an object, valid for `ttl`.
    async fn create_signed_url(&self, bucket: &str, key: &str, ttl: Duration) -> Result<String>;

    // Context-aware surface.

    /// Context-aware `init`. Identical behavior and identical one-shot
    /// guarantee as [`init`](Self::init); both surfaces share the same
    /// stored configuration.
    async fn init_ctx(&self, ctx: &CancellationToken, config: PluginConfig) -> Result<()>;

    /// Context-aware [`put_object`](Self::put_object).
    async fn put_object_ctx(
        &self,
        ctx: &CancellationToken,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
    ) -> Result<()>;

    /// Context-aware [`object_exists`](Self::object_exists).
    async fn object_exists_ctx(
        &self,
        ctx: &CancellationToken,
        bucket: &str,
        key: &str,
    ) -> Result<bool>;

    /// Context-aware [`get_object`](Self::get_object).
    async fn get_object_ctx(
        &self,
        ctx: &CancellationToken,
        bucket: &str,
        key: &str,
    ) -> Result<Vec<u8>>;

    /// Context-aware [`list_common_prefixes`](Self::list_common_prefixes).
    async fn list_common_prefixes_ctx(
        &self,
        ctx: &CancellationToken,
        bucket: &str,
        prefix: &str,
        delimiter: &str,
    ) -> Result<Vec<String>>;

    /// Context-aware [`list_objects`](Self::list_objects).
    async fn list_objects_ctx(
        &self,
        ctx: &CancellationToken,
        bucket: &str,
        prefix: &str,
    ) -> Result<Vec<String>>;

    /// Context-aware [`delete_object`](Self::delete_object).
    async fn delete_object_ctx(
        &self,
        ctx: &CancellationToken,
        bucket: &str,
        key: &str,
    ) -> Result<()>;

    /// Context-aware [`create_signed_url`](Self::create_signed_url).
    async fn create_signed_url_ctx(
        &self,
        ctx: &CancellationToken,
        bucket: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<String>;
}
