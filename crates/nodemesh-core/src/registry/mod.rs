//! Membership registry: this node's own record and lease.
//!
//! `register` grants a lease, writes the node record under it, starts the
//! keep-alive task and mirrors every configured prefix. `deregister` undoes all
//! of it and releases the directory.

mod keepalive;

use chrono::{DateTime, Utc};
use nodemesh_types::{
    new_incarnation_id, DirectoryError, LeaseId, NodeConfig, NodeDescriptor, NodeKey, NodeRecord,
    RegistryError, SelfLossPolicy, CONFIG_PREFIX, KEY_SEPARATOR,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::directory::{with_timeout, Directory};
use crate::mirror::{ClusterMirror, MirrorAlert};

/// Identity of the running process.
#[derive(Debug, Clone)]
pub struct LocalNode {
    descriptor: NodeDescriptor,
    incarnation_id: String,
    started_at: DateTime<Utc>,
}

impl LocalNode {
    /// New incarnation of the configured node.
    pub fn new(descriptor: NodeDescriptor) -> Self {
        Self::with_incarnation(descriptor, new_incarnation_id())
    }

    pub fn with_incarnation(descriptor: NodeDescriptor, incarnation_id: impl Into<String>) -> Self {
        Self { descriptor, incarnation_id: incarnation_id.into(), started_at: Utc::now() }
    }

    pub fn key(&self) -> NodeKey {
        self.descriptor.key()
    }

    pub fn descriptor(&self) -> &NodeDescriptor {
        &self.descriptor
    }

    pub fn incarnation_id(&self) -> &str {
        &self.incarnation_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn record(&self) -> NodeRecord {
        self.descriptor.to_record(&self.incarnation_id)
    }
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub lease_ttl: Duration,
    pub keep_alive_interval: Duration,
    pub keep_alive_timeout: Duration,
    pub request_timeout: Duration,
    pub self_loss_policy: SelfLossPolicy,
    /// Prefixes to mirror once registered, own type first
    pub watch_prefixes: Vec<String>,
}

impl From<&NodeConfig> for RegistrySettings {
    fn from(config: &NodeConfig) -> Self {
        Self {
            lease_ttl: config.lease_ttl(),
            keep_alive_interval: config.keep_alive_interval(),
            keep_alive_timeout: config.keep_alive_timeout(),
            request_timeout: config.request_timeout(),
            self_loss_policy: config.self_loss_policy,
            watch_prefixes: config.mirrored_prefixes(),
        }
    }
}

pub struct MembershipRegistry {
    directory: Arc<dyn Directory>,
    mirror: Arc<ClusterMirror>,
    local: LocalNode,
    settings: RegistrySettings,
    lease: Mutex<Option<LeaseId>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl MembershipRegistry {
    pub fn new(
        directory: Arc<dyn Directory>,
        mirror: Arc<ClusterMirror>,
        local: LocalNode,
        settings: RegistrySettings,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            directory,
            mirror,
            local,
            settings,
            lease: Mutex::new(None),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn local(&self) -> &LocalNode {
        &self.local
    }

    pub fn current_lease(&self) -> Option<LeaseId> {
        *self.lease.lock()
    }

    /// Register this node and start following the cluster.
    ///
    /// Every error is fatal for startup; anything acquired before the failure is released.
    pub async fn register(self: &Arc<Self>) -> Result<LeaseId, RegistryError> {
        let key = self.local.key();
        if self.current_lease().is_some() {
            return Err(RegistryError::AlreadyRegistered { key: key.directory_key() });
        }

        let lease = self.publish().await?;
        self.start_keep_alive_task();

        let alerts = (self.settings.self_loss_policy == SelfLossPolicy::Reregister)
            .then(|| self.mirror.subscribe_alerts());

        for prefix in &self.settings.watch_prefixes {
            if let Err(source) = self.mirror.watch(prefix).await {
                tracing::error!(prefix = %prefix, error = %source, "Failed to mirror prefix");
                if let Err(e) = self.deregister().await {
                    tracing::warn!(error = %e, "Cleanup after failed registration incomplete");
                }
                return Err(RegistryError::WatchFailed { prefix: prefix.clone(), source });
            }
        }

        if let Some(alerts) = alerts {
            self.start_self_loss_task(alerts);
        }

        tracing::info!(
            key = %key,
            lease = %lease,
            incarnation = %self.local.incarnation_id,
            ttl_secs = self.settings.lease_ttl.as_secs(),
            "✅ Node registered"
        );
        Ok(lease)
    }

    /// Grant a lease and write the node record under it.
    async fn publish(&self) -> Result<LeaseId, RegistryError> {
        let lease = with_timeout(
            "grant_lease",
            self.settings.keep_alive_timeout,
            self.directory.grant_lease(self.settings.lease_ttl),
        )
        .await
        .map_err(RegistryError::Connect)?;

        let key = self.local.key().directory_key();
        let written = match self.local.record().encode() {
            Ok(value) => {
                with_timeout(
                    "put_with_lease",
                    self.settings.request_timeout,
                    self.directory.put_with_lease(&key, value, lease),
                )
                .await
            },
            Err(e) => Err(DirectoryError::codec(&key, &e)),
        };

        if let Err(source) = written {
            if let Err(e) = self.directory.revoke(lease).await {
                tracing::warn!(lease = %lease, error = %e, "Failed to revoke lease after rejected write");
            }
            return Err(RegistryError::RegistrationFailed { key, source });
        }

        *self.lease.lock() = Some(lease);
        Ok(lease)
    }

    fn start_self_loss_task(self: &Arc<Self>, mut alerts: broadcast::Receiver<MirrorAlert>) {
        let registry = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    alert = alerts.recv() => match alert {
                        Ok(MirrorAlert::SelfRecordLost { key }) => registry.reregister(&key).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "Missed mirror alerts");
                        },
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    _ = shutdown_rx.changed() => break,
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Write the record again under a new lease, keeping the incarnation id.
    async fn reregister(&self, key: &NodeKey) {
        if *self.shutdown_tx.borrow() {
            return;
        }
        let stale = self.lease.lock().take();
        if let Some(old) = stale {
            if let Err(e) = self.directory.revoke(old).await {
                tracing::debug!(lease = %old, error = %e, "Old lease already gone");
            }
        }
        match self.publish().await {
            Ok(lease) => tracing::info!(key = %key, lease = %lease, "🔄 Node re-registered"),
            Err(e) => tracing::error!(key = %key, error = %e, "Re-registration failed"),
        }
    }

    /// Revoke the lease and release the directory.
    pub async fn deregister(&self) -> Result<(), RegistryError> {
        self.shutdown_tx.send_replace(true);
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
        }
        self.mirror.stop().await;

        let mut result = Ok(());
        let lease = self.lease.lock().take();
        if let Some(lease) = lease {
            match with_timeout("revoke", self.settings.keep_alive_timeout, self.directory.revoke(lease))
                .await
            {
                Ok(()) => tracing::info!(key = %self.local.key(), lease = %lease, "👋 Lease revoked"),
                Err(e) => {
                    tracing::warn!(lease = %lease, error = %e, "Failed to revoke lease");
                    result = Err(RegistryError::Directory(e));
                },
            }
        }
        if let Err(e) = self.directory.close().await {
            tracing::warn!(error = %e, "Failed to close directory");
            if result.is_ok() {
                result = Err(RegistryError::Directory(e));
            }
        }
        result
    }

    /// Every `config/<name>` entry, keyed by name.
    pub async fn list_config(&self) -> Result<BTreeMap<String, String>, RegistryError> {
        let scope = format!("{CONFIG_PREFIX}{KEY_SEPARATOR}");
        let snapshot =
            with_timeout("get_prefix", self.settings.request_timeout, self.directory.get_prefix(&scope))
                .await?;

        let mut entries = BTreeMap::new();
        for kv in snapshot.kvs {
            let Some(name) = kv.key.strip_prefix(&scope) else {
                continue;
            };
            match String::from_utf8(kv.value) {
                Ok(value) => {
                    entries.insert(name.to_string(), value);
                },
                Err(e) => tracing::warn!(key = %kv.key, error = %e, "Skipping non UTF-8 config entry"),
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests;
