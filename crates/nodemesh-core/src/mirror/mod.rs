//! Watch-driven in-memory copy of cluster membership.
//!
//! Each watched prefix is seeded from a bulk read and then follows the
//! directory's event stream from the revision right after that read. One task
//! per prefix applies events in delivery order; every mutation goes through a
//! single mutex shared with the session router's read path.

mod state;

use futures::StreamExt;
use nodemesh_types::{DirectoryError, LeaseId, NodeKey, NodeRecord, KEY_SEPARATOR};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::directory::{Directory, WatchEvent, WatchEventKind, WatchStream};
use crate::synchronizer::ConnectionSynchronizer;
pub(crate) use state::MirrorChange;
use state::MirrorState;
pub use state::PrefixMap;

const RESYNC_BACKOFF: Duration = Duration::from_secs(1);
const ALERT_CAPACITY: usize = 16;

/// Conditions the mirror cannot resolve on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum MirrorAlert {
    /// The directory deleted this node's own membership record
    SelfRecordLost { key: NodeKey },
}

pub struct ClusterMirror {
    directory: Arc<dyn Directory>,
    synchronizer: Arc<ConnectionSynchronizer>,
    self_key: NodeKey,
    state: Mutex<MirrorState>,
    watchers: tokio::sync::Mutex<HashMap<String, JoinHandle<()>>>,
    alerts: broadcast::Sender<MirrorAlert>,
    shutdown_tx: watch::Sender<bool>,
}

impl ClusterMirror {
    pub fn new(
        directory: Arc<dyn Directory>,
        synchronizer: Arc<ConnectionSynchronizer>,
        self_key: NodeKey,
    ) -> Arc<Self> {
        let (alerts, _) = broadcast::channel(ALERT_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            directory,
            synchronizer,
            self_key,
            state: Mutex::new(MirrorState::default()),
            watchers: tokio::sync::Mutex::new(HashMap::new()),
            alerts,
            shutdown_tx,
        })
    }

    /// Start mirroring `prefix`. Calling it again for the same prefix is a no-op.
    pub async fn watch(self: &Arc<Self>, prefix: &str) -> Result<(), DirectoryError> {
        let mut watchers = self.watchers.lock().await;
        if watchers.contains_key(prefix) {
            return Ok(());
        }
        if *self.shutdown_tx.borrow() {
            return Err(DirectoryError::Closed);
        }

        self.state.lock().ensure_prefix(prefix);
        let stream = self.seed(prefix).await?;

        let mirror = Arc::clone(self);
        let owned = prefix.to_string();
        let handle = tokio::spawn(async move { mirror.follow(owned, stream).await });
        watchers.insert(prefix.to_string(), handle);

        tracing::info!(prefix = %prefix, records = self.len(prefix), "👀 Mirroring prefix");
        Ok(())
    }

    /// Bulk-read the prefix, reconcile the map with it, and subscribe from the next revision.
    async fn seed(&self, prefix: &str) -> Result<WatchStream, DirectoryError> {
        let scope = watch_scope(prefix);
        let snapshot = self.directory.get_prefix(&scope).await?;

        let present: HashSet<String> = snapshot.kvs.iter().map(|kv| kv.key.clone()).collect();
        let mut changes = Vec::with_capacity(snapshot.kvs.len());
        {
            let mut state = self.state.lock();
            for (key, change) in state.retain_keys(prefix, &present) {
                changes.push((key, change));
            }
            for kv in &snapshot.kvs {
                let change = state.apply_put(prefix, &kv.key, &kv.value, kv.lease);
                changes.push((kv.key.clone(), change));
            }
        }
        for (key, change) in changes {
            self.notify(&key, change);
        }

        self.directory.watch(&scope, snapshot.revision + 1).await
    }

    async fn follow(self: Arc<Self>, prefix: String, mut stream: WatchStream) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                next = stream.next() => match next {
                    Some(Ok(event)) => self.apply(&prefix, &event),
                    Some(Err(e)) => {
                        tracing::warn!(prefix = %prefix, error = %e, "Watch stream failed, resyncing");
                        match self.resync(&prefix, &mut shutdown_rx).await {
                            Some(fresh) => stream = fresh,
                            None => break,
                        }
                    },
                    None => {
                        tracing::info!(prefix = %prefix, "Watch stream closed");
                        break;
                    },
                },
                _ = shutdown_rx.changed() => {
                    tracing::debug!(prefix = %prefix, "Mirror watch task shutting down");
                    break;
                }
            }
        }
    }

    /// Re-seed until it succeeds; `None` once shutdown is requested or the directory is closed.
    async fn resync(
        &self,
        prefix: &str,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Option<WatchStream> {
        loop {
            if *shutdown_rx.borrow() {
                return None;
            }
            match self.seed(prefix).await {
                Ok(stream) => {
                    tracing::info!(prefix = %prefix, "Watch resynchronized");
                    return Some(stream);
                },
                Err(DirectoryError::Closed) => return None,
                Err(e) => {
                    tracing::warn!(prefix = %prefix, error = %e, "Resync failed, retrying");
                },
            }
            tokio::select! {
                () = tokio::time::sleep(RESYNC_BACKOFF) => {}
                _ = shutdown_rx.changed() => return None,
            }
        }
    }

    /// Apply one watch event for `prefix`.
    pub(crate) fn apply(&self, prefix: &str, event: &WatchEvent) {
        let change = {
            let mut state = self.state.lock();
            match event.kind {
                WatchEventKind::Put => state.apply_put(prefix, &event.key, &event.value, event.lease),
                WatchEventKind::Delete => state.apply_delete(prefix, &event.key),
            }
        };
        self.notify(&event.key, change);
    }

    fn notify(&self, key: &str, change: MirrorChange) {
        match change {
            MirrorChange::Upserted(record) => self.synchronizer.on_join(&record),
            MirrorChange::Removed(record) => {
                self.synchronizer.on_leave(&record);
                if key == self.self_key.directory_key() {
                    tracing::warn!(key = %key, "⚠️ Directory dropped this node's own record");
                    // Nobody subscribed is fine: the policy is alert-only.
                    let _ = self.alerts.send(MirrorAlert::SelfRecordLost { key: self.self_key.clone() });
                }
            },
            MirrorChange::Unchanged => {},
        }
    }

    /// Snapshot of a prefix; empty for an unknown prefix.
    pub fn read(&self, prefix: &str) -> PrefixMap {
        self.state.lock().prefix(prefix).cloned().unwrap_or_default()
    }

    /// Run `f` against a prefix while holding the mirror lock.
    pub fn with_prefix<R>(&self, prefix: &str, f: impl FnOnce(Option<&PrefixMap>) -> R) -> R {
        let state = self.state.lock();
        f(state.prefix(prefix))
    }

    pub fn get(&self, prefix: &str, key: &str) -> Option<NodeRecord> {
        self.state.lock().prefix(prefix).and_then(|records| records.get(key).cloned())
    }

    pub fn len(&self, prefix: &str) -> usize {
        self.state.lock().prefix(prefix).map_or(0, PrefixMap::len)
    }

    pub fn prefixes(&self) -> Vec<String> {
        self.state.lock().prefix_names()
    }

    pub fn lease_of(&self, node: &NodeKey) -> Option<LeaseId> {
        self.state.lock().lease_of(node)
    }

    /// Update a mirrored node's client count, returning the record to write back.
    pub fn set_client_count(&self, node: &NodeKey, count: u32) -> Option<(NodeRecord, Option<LeaseId>)> {
        self.state.lock().set_client_count(node, count)
    }

    pub fn self_key(&self) -> &NodeKey {
        &self.self_key
    }

    pub fn subscribe_alerts(&self) -> broadcast::Receiver<MirrorAlert> {
        self.alerts.subscribe()
    }

    /// Stop every watch task. Mirrored contents stay readable.
    pub async fn stop(&self) {
        self.shutdown_tx.send_replace(true);
        let mut watchers = self.watchers.lock().await;
        for (prefix, handle) in watchers.drain() {
            handle.abort();
            tracing::debug!(prefix = %prefix, "Mirror watch task stopped");
        }
    }
}

/// Keys of a prefix all start with `<prefix>/`, which keeps `chat` from matching `chatServer`.
fn watch_scope(prefix: &str) -> String {
    format!("{prefix}{KEY_SEPARATOR}")
}
