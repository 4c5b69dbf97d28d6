//! Directory client seam.
//!
//! The shared directory (key/value store with leases and watches) is consumed
//! through the [`Directory`] trait. `EtcdDirectory` (feature `etcd`) talks to a
//! real cluster; [`MemoryDirectory`] is the in-process implementation used in
//! standalone mode and as the test double.
//!
//! Watch contract: `watch(prefix, start_revision)` yields every event with
//! `revision >= start_revision`. Seeding a mirror with `get_prefix` and then
//! watching from `snapshot.revision + 1` therefore loses no event in between.

use async_trait::async_trait;
use futures::stream::BoxStream;
use nodemesh_types::{DirectoryError, LeaseId};
use serde::Serialize;
use std::time::Duration;

#[cfg(feature = "etcd")]
mod etcd;
mod memory;

#[cfg(feature = "etcd")]
pub use etcd::EtcdDirectory;
pub use memory::MemoryDirectory;

/// A stored key with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    /// Lease the key is attached to, if any
    pub lease: Option<LeaseId>,
    /// Revision of the last write to this key
    pub mod_revision: u64,
}

/// Consistent bulk read of a prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixSnapshot {
    /// Store revision observed by the read
    pub revision: u64,
    pub kvs: Vec<KeyValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WatchEventKind {
    Put,
    Delete,
}

/// One change delivered by a watch subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    pub key: String,
    /// Raw value for `Put`, empty for `Delete`
    pub value: Vec<u8>,
    pub lease: Option<LeaseId>,
    pub revision: u64,
}

impl WatchEvent {
    pub fn put(key: impl Into<String>, value: Vec<u8>, lease: Option<LeaseId>, revision: u64) -> Self {
        Self { kind: WatchEventKind::Put, key: key.into(), value, lease, revision }
    }

    pub fn delete(key: impl Into<String>, revision: u64) -> Self {
        Self { kind: WatchEventKind::Delete, key: key.into(), value: Vec::new(), lease: None, revision }
    }
}

/// Stream of watch events; ends when the directory closes.
pub type WatchStream = BoxStream<'static, Result<WatchEvent, DirectoryError>>;

/// Shared, lease-capable key/value directory.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, DirectoryError>;

    async fn get_prefix(&self, prefix: &str) -> Result<PrefixSnapshot, DirectoryError>;

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), DirectoryError>;

    /// Write attached to `lease`; fails with `LeaseNotFound` once the lease is gone.
    async fn put_with_lease(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: LeaseId,
    ) -> Result<(), DirectoryError>;

    /// Overwrite `key` only while it is still attached to `lease`.
    ///
    /// Fails with `LeaseMismatch` when the key is gone or held by another
    /// lease. A lease that is itself gone may also surface as `LeaseNotFound`.
    async fn put_if_lease(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: LeaseId,
    ) -> Result<(), DirectoryError>;

    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> Result<bool, DirectoryError>;

    async fn watch(&self, prefix: &str, start_revision: u64) -> Result<WatchStream, DirectoryError>;

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, DirectoryError>;

    /// Renew a lease, returning its full TTL.
    async fn keep_alive(&self, lease: LeaseId) -> Result<Duration, DirectoryError>;

    /// Revoke a lease and delete every key attached to it.
    async fn revoke(&self, lease: LeaseId) -> Result<(), DirectoryError>;

    async fn close(&self) -> Result<(), DirectoryError>;
}

/// Run a directory call under a deadline.
pub async fn with_timeout<T, F>(
    operation: &str,
    limit: Duration,
    fut: F,
) -> Result<T, DirectoryError>
where
    F: std::future::Future<Output = Result<T, DirectoryError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DirectoryError::timeout(operation, limit)),
    }
}
