//! Lock-protected mirror contents.

use nodemesh_types::{LeaseId, NodeKey, NodeRecord};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Records of one prefix, keyed by directory key.
pub type PrefixMap = BTreeMap<String, NodeRecord>;

/// Result of applying one directory event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MirrorChange {
    Upserted(NodeRecord),
    Removed(NodeRecord),
    Unchanged,
}

#[derive(Debug, Default)]
pub(crate) struct MirrorState {
    prefixes: HashMap<String, PrefixMap>,
    leases: HashMap<NodeKey, LeaseId>,
}

fn node_key(key: &str, record: &NodeRecord) -> NodeKey {
    NodeKey::parse(key).unwrap_or_else(|| record.key())
}

impl MirrorState {
    /// Returns true when the prefix was not mirrored before.
    pub fn ensure_prefix(&mut self, prefix: &str) -> bool {
        if self.prefixes.contains_key(prefix) {
            return false;
        }
        self.prefixes.insert(prefix.to_string(), PrefixMap::new());
        true
    }

    pub fn apply_put(
        &mut self,
        prefix: &str,
        key: &str,
        value: &[u8],
        lease: Option<LeaseId>,
    ) -> MirrorChange {
        let record = match NodeRecord::decode(value) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(prefix = %prefix, key = %key, error = %e, "Discarding malformed node record");
                return MirrorChange::Unchanged;
            },
        };

        let node = node_key(key, &record);
        match lease {
            Some(id) => {
                self.leases.insert(node, id);
            },
            None => {
                self.leases.remove(&node);
            },
        }
        self.prefixes
            .entry(prefix.to_string())
            .or_default()
            .insert(key.to_string(), record.clone());
        MirrorChange::Upserted(record)
    }

    pub fn apply_delete(&mut self, prefix: &str, key: &str) -> MirrorChange {
        let removed = self.prefixes.get_mut(prefix).and_then(|records| records.remove(key));
        match removed {
            Some(record) => {
                self.leases.remove(&node_key(key, &record));
                MirrorChange::Removed(record)
            },
            None => MirrorChange::Unchanged,
        }
    }

    /// Delete every mirrored key of `prefix` missing from `present`.
    pub fn retain_keys(&mut self, prefix: &str, present: &HashSet<String>) -> Vec<(String, MirrorChange)> {
        let stale: Vec<String> = self
            .prefixes
            .get(prefix)
            .map(|records| records.keys().filter(|k| !present.contains(*k)).cloned().collect())
            .unwrap_or_default();
        stale
            .into_iter()
            .map(|key| {
                let change = self.apply_delete(prefix, &key);
                (key, change)
            })
            .collect()
    }

    pub fn prefix(&self, prefix: &str) -> Option<&PrefixMap> {
        self.prefixes.get(prefix)
    }

    pub fn prefix_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.prefixes.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn lease_of(&self, node: &NodeKey) -> Option<LeaseId> {
        self.leases.get(node).copied()
    }

    /// Set the in-memory client count; returns the updated record and its lease.
    pub fn set_client_count(
        &mut self,
        node: &NodeKey,
        count: u32,
    ) -> Option<(NodeRecord, Option<LeaseId>)> {
        let lease = self.lease_of(node);
        let record = self.prefixes.get_mut(&node.node_type)?.get_mut(&node.directory_key())?;
        record.client_count = count;
        Some((record.clone(), lease))
    }
}
