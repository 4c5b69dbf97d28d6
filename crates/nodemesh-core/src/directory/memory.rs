//! In-process directory with leases, revisions, and replayable watches.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  MemoryDirectory                                              │
//! │  ├── store: Mutex<Store>                                      │
//! │  │   ├── entries: BTreeMap<key, Entry>                        │
//! │  │   ├── leases: HashMap<LeaseId, Lease>                      │
//! │  │   ├── history: VecDeque<WatchEvent> (bounded)              │
//! │  │   └── sender: broadcast::Sender<WatchEvent>                │
//! │  └── reaper: background task expiring overdue leases          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Events are published while the store lock is held, and watchers subscribe
//! under the same lock, so the backlog taken from `history` and the live
//! broadcast never overlap or leave a gap.

use async_trait::async_trait;
use nodemesh_types::{DirectoryError, LeaseId};
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{Directory, KeyValue, PrefixSnapshot, WatchEvent, WatchStream};

const HISTORY_CAPACITY: usize = 4096;
const CHANNEL_CAPACITY: usize = 1024;

struct Entry {
    value: Vec<u8>,
    lease: Option<LeaseId>,
    mod_revision: u64,
}

struct Lease {
    ttl: Duration,
    deadline: Instant,
    keys: BTreeSet<String>,
}

struct Store {
    revision: u64,
    entries: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, Lease>,
    next_lease: i64,
    history: VecDeque<WatchEvent>,
    failing_renewals: HashSet<LeaseId>,
    failing_prefix_reads: bool,
    sender: Option<broadcast::Sender<WatchEvent>>,
}

impl Store {
    fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            revision: 0,
            entries: BTreeMap::new(),
            leases: HashMap::new(),
            next_lease: 0,
            history: VecDeque::new(),
            failing_renewals: HashSet::new(),
            failing_prefix_reads: false,
            sender: Some(sender),
        }
    }

    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    fn oldest_revision(&self) -> u64 {
        self.history.front().map_or(self.revision + 1, |e| e.revision)
    }

    fn put(&mut self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> WatchEvent {
        let previous = self.entries.get(key).and_then(|e| e.lease);
        if let Some(prev) = previous.filter(|prev| Some(*prev) != lease) {
            if let Some(old) = self.leases.get_mut(&prev) {
                old.keys.remove(key);
            }
        }
        if let Some(id) = lease {
            if let Some(current) = self.leases.get_mut(&id) {
                current.keys.insert(key.to_string());
            }
        }

        let revision = self.next_revision();
        self.entries
            .insert(key.to_string(), Entry { value: value.clone(), lease, mod_revision: revision });
        WatchEvent::put(key, value, lease, revision)
    }

    fn delete(&mut self, key: &str) -> Option<WatchEvent> {
        let entry = self.entries.remove(key)?;
        if let Some(id) = entry.lease {
            if let Some(lease) = self.leases.get_mut(&id) {
                lease.keys.remove(key);
            }
        }
        let revision = self.next_revision();
        Some(WatchEvent::delete(key, revision))
    }

    fn drop_lease(&mut self, id: LeaseId) -> Option<Vec<WatchEvent>> {
        let lease = self.leases.remove(&id)?;
        self.failing_renewals.remove(&id);
        Some(lease.keys.iter().filter_map(|key| self.delete(key)).collect())
    }

    /// Lease that exists and has not passed its deadline.
    fn live_lease(&mut self, id: LeaseId, now: Instant) -> Result<&mut Lease, Vec<WatchEvent>> {
        let expired = match self.leases.get(&id) {
            None => return Err(Vec::new()),
            Some(lease) => lease.deadline <= now,
        };
        if expired {
            return Err(self.drop_lease(id).unwrap_or_default());
        }
        self.leases.get_mut(&id).ok_or_else(Vec::new)
    }

    fn commit(&mut self, events: Vec<WatchEvent>) {
        for event in events {
            self.history.push_back(event.clone());
            if self.history.len() > HISTORY_CAPACITY {
                self.history.pop_front();
            }
            if let Some(sender) = &self.sender {
                // No receivers is fine: nobody is watching yet.
                let _ = sender.send(event);
            }
        }
    }
}

/// In-process [`Directory`].
pub struct MemoryDirectory {
    store: Mutex<Store>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl MemoryDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { store: Mutex::new(Store::new()), reaper: Mutex::new(None) })
    }

    /// Start the background task that expires overdue leases.
    pub fn start_reaper(self: &Arc<Self>, every: Duration) {
        let directory: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(directory) = directory.upgrade() else {
                    break;
                };
                if directory.is_closed() {
                    break;
                }
                let expired = directory.expire_now();
                if expired > 0 {
                    tracing::debug!(expired, "Lease reaper expired overdue leases");
                }
            }
        });

        if let Some(previous) = self.reaper.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Expire every lease whose deadline has passed; returns how many expired.
    pub fn expire_now(&self) -> usize {
        let now = Instant::now();
        let mut store = self.store.lock();
        let overdue: Vec<LeaseId> = store
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        for id in &overdue {
            let events = store.drop_lease(*id).unwrap_or_default();
            tracing::info!(lease = %id, keys = events.len(), "⏱️ Lease expired");
            store.commit(events);
        }
        overdue.len()
    }

    /// Make renewals of `lease` fail (or succeed again).
    pub fn fail_keep_alive(&self, lease: LeaseId, fail: bool) {
        let mut store = self.store.lock();
        if fail {
            store.failing_renewals.insert(lease);
        } else {
            store.failing_renewals.remove(&lease);
        }
    }

    /// Make prefix reads fail (or succeed again).
    pub fn fail_prefix_reads(&self, fail: bool) {
        self.store.lock().failing_prefix_reads = fail;
    }

    pub fn revision(&self) -> u64 {
        self.store.lock().revision
    }

    pub fn lease_count(&self) -> usize {
        self.store.lock().leases.len()
    }

    pub fn is_closed(&self) -> bool {
        self.store.lock().sender.is_none()
    }

    fn open(&self) -> Result<MutexGuard<'_, Store>, DirectoryError> {
        let store = self.store.lock();
        if store.sender.is_none() {
            return Err(DirectoryError::Closed);
        }
        Ok(store)
    }
}

#[async_trait]
impl Directory for MemoryDirectory {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>, DirectoryError> {
        let store = self.open()?;
        Ok(store.entries.get(key).map(|entry| KeyValue {
            key: key.to_string(),
            value: entry.value.clone(),
            lease: entry.lease,
            mod_revision: entry.mod_revision,
        }))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<PrefixSnapshot, DirectoryError> {
        let store = self.open()?;
        if store.failing_prefix_reads {
            return Err(DirectoryError::Unavailable { message: format!("read of {prefix} rejected") });
        }
        let kvs = store
            .entries
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| KeyValue {
                key: key.clone(),
                value: entry.value.clone(),
                lease: entry.lease,
                mod_revision: entry.mod_revision,
            })
            .collect();
        Ok(PrefixSnapshot { revision: store.revision, kvs })
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), DirectoryError> {
        let mut store = self.open()?;
        let event = store.put(key, value, None);
        store.commit(vec![event]);
        Ok(())
    }

    async fn put_with_lease(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: LeaseId,
    ) -> Result<(), DirectoryError> {
        let mut store = self.open()?;
        if let Err(expired) = store.live_lease(lease, Instant::now()) {
            store.commit(expired);
            return Err(DirectoryError::LeaseNotFound { lease: lease.0 });
        }
        let event = store.put(key, value, Some(lease));
        store.commit(vec![event]);
        Ok(())
    }

    async fn put_if_lease(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: LeaseId,
    ) -> Result<(), DirectoryError> {
        let mut store = self.open()?;
        if let Err(expired) = store.live_lease(lease, Instant::now()) {
            store.commit(expired);
            return Err(DirectoryError::LeaseNotFound { lease: lease.0 });
        }
        let holder = store.entries.get(key).map(|entry| entry.lease);
        if holder != Some(Some(lease)) {
            return Err(DirectoryError::LeaseMismatch {
                key: key.to_string(),
                expected: lease.0,
                actual: holder.flatten().map(|id| id.0),
            });
        }
        let event = store.put(key, value, Some(lease));
        store.commit(vec![event]);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, DirectoryError> {
        let mut store = self.open()?;
        match store.delete(key) {
            Some(event) => {
                store.commit(vec![event]);
                Ok(true)
            },
            None => Ok(false),
        }
    }

    async fn watch(&self, prefix: &str, start_revision: u64) -> Result<WatchStream, DirectoryError> {
        let store = self.open()?;
        let start = start_revision.max(1);
        let oldest = store.oldest_revision();
        if start <= store.revision && start < oldest {
            return Err(DirectoryError::Compacted { requested: start, oldest });
        }

        let mut rx = match &store.sender {
            Some(sender) => sender.subscribe(),
            None => return Err(DirectoryError::Closed),
        };
        let backlog: Vec<WatchEvent> = store
            .history
            .iter()
            .filter(|e| e.revision >= start && e.key.starts_with(prefix))
            .cloned()
            .collect();
        drop(store);

        let prefix = prefix.to_string();
        let stream = async_stream::stream! {
            let mut last = start.saturating_sub(1);
            for event in backlog {
                last = event.revision;
                yield Ok(event);
            }
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if event.revision > last && event.key.starts_with(&prefix) {
                            last = event.revision;
                            yield Ok(event);
                        }
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        yield Err(DirectoryError::WatchLagged { skipped });
                        break;
                    },
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, DirectoryError> {
        let mut store = self.open()?;
        store.next_lease += 1;
        let id = LeaseId(store.next_lease);
        store
            .leases
            .insert(id, Lease { ttl, deadline: Instant::now() + ttl, keys: BTreeSet::new() });
        Ok(id)
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<Duration, DirectoryError> {
        let mut store = self.open()?;
        if store.failing_renewals.contains(&lease) {
            return Err(DirectoryError::Unavailable {
                message: format!("renewal of lease {lease} rejected"),
            });
        }
        let now = Instant::now();
        match store.live_lease(lease, now) {
            Ok(current) => {
                current.deadline = now + current.ttl;
                Ok(current.ttl)
            },
            Err(expired) => {
                store.commit(expired);
                Err(DirectoryError::LeaseNotFound { lease: lease.0 })
            },
        }
    }

    async fn revoke(&self, lease: LeaseId) -> Result<(), DirectoryError> {
        let mut store = self.open()?;
        let events =
            store.drop_lease(lease).ok_or(DirectoryError::LeaseNotFound { lease: lease.0 })?;
        tracing::debug!(lease = %lease, keys = events.len(), "Lease revoked");
        store.commit(events);
        Ok(())
    }

    async fn close(&self) -> Result<(), DirectoryError> {
        self.store.lock().sender = None;
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.abort();
        }
        Ok(())
    }
}
