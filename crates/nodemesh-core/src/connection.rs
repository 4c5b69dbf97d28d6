//! Outbound peer connection management.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

/// Opens and closes outbound RPC connections to peers.
///
/// Calls come from the mirror's watch tasks and must not block.
pub trait ConnectionManager: Send + Sync {
    /// Open (or replace) the connection to `name` at `addr`.
    fn add_client(&self, name: &str, addr: &str);

    /// Close the connection to `name`; unknown names are ignored.
    fn remove_client(&self, name: &str);
}

/// One tracked peer connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerConnection {
    pub name: String,
    pub addr: String,
    pub connected_at: DateTime<Utc>,
}

/// Connection table keyed by peer name.
///
/// Stands in for the RPC transport: it records which peers this node is
/// connected to so the control surface can report them.
#[derive(Debug, Default)]
pub struct PeerTable {
    peers: DashMap<String, PeerConnection>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.peers.contains_key(name)
    }

    pub fn addr(&self, name: &str) -> Option<String> {
        self.peers.get(name).map(|peer| peer.addr.clone())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Connected peers sorted by name.
    pub fn snapshot(&self) -> Vec<PeerConnection> {
        let mut peers: Vec<_> = self.peers.iter().map(|entry| entry.value().clone()).collect();
        peers.sort_by(|a, b| a.name.cmp(&b.name));
        peers
    }
}

impl ConnectionManager for PeerTable {
    fn add_client(&self, name: &str, addr: &str) {
        let previous = self.peers.insert(
            name.to_string(),
            PeerConnection { name: name.to_string(), addr: addr.to_string(), connected_at: Utc::now() },
        );
        match previous {
            Some(old) if old.addr != addr => {
                tracing::info!(peer = %name, old_addr = %old.addr, addr = %addr, "🔁 Peer connection replaced");
            },
            Some(_) => tracing::debug!(peer = %name, "Peer connection refreshed"),
            None => tracing::info!(peer = %name, addr = %addr, "🔗 Peer connected"),
        }
    }

    fn remove_client(&self, name: &str) {
        if self.peers.remove(name).is_some() {
            tracing::info!(peer = %name, "🔌 Peer disconnected");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_replace_remove() {
        let table = PeerTable::new();
        table.add_client("chat-1", "10.0.0.5:9001");
        table.add_client("chat-2", "10.0.0.6:9001");
        assert_eq!(table.len(), 2);

        table.add_client("chat-1", "10.0.0.9:9001");
        assert_eq!(table.len(), 2);
        assert_eq!(table.addr("chat-1").as_deref(), Some("10.0.0.9:9001"));

        table.remove_client("chat-1");
        table.remove_client("missing");
        assert!(!table.contains("chat-1"));
        let names: Vec<_> = table.snapshot().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["chat-2"]);
    }
}
