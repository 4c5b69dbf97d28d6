//! Translates membership changes into peer connection changes.

use nodemesh_types::{NodeRecord, RoutingTable};
use std::sync::Arc;

use crate::connection::ConnectionManager;

pub struct ConnectionSynchronizer {
    local_type: String,
    local_name: String,
    table: RoutingTable,
    connections: Arc<dyn ConnectionManager>,
}

impl ConnectionSynchronizer {
    pub fn new(
        local_type: impl Into<String>,
        local_name: impl Into<String>,
        table: RoutingTable,
        connections: Arc<dyn ConnectionManager>,
    ) -> Self {
        Self { local_type: local_type.into(), local_name: local_name.into(), table, connections }
    }

    /// Whether this node keeps a connection to `record`.
    ///
    /// Never true for the node itself or for a peer without a listen address.
    pub fn wants_connection(&self, record: &NodeRecord) -> bool {
        let is_self = record.node_type == self.local_type && record.name == self.local_name;
        !is_self
            && record.has_listen_addr()
            && self.table.should_connect(&self.local_type, &record.node_type)
    }

    /// A peer appeared or its record changed.
    pub fn on_join(&self, record: &NodeRecord) {
        if !self.wants_connection(record) {
            tracing::trace!(peer = %record.key(), "No connection rule for peer");
            return;
        }
        tracing::debug!(peer = %record.key(), addr = %record.listen_addr, "Connecting to peer");
        self.connections.add_client(&record.name, &record.listen_addr);
    }

    /// A peer's record was removed; `record` is its last known state.
    pub fn on_leave(&self, record: &NodeRecord) {
        if !self.wants_connection(record) {
            return;
        }
        tracing::debug!(peer = %record.key(), "Disconnecting from peer");
        self.connections.remove_client(&record.name);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use nodemesh_types::NodeDescriptor;
    use parking_lot::Mutex;

    /// Connection manager that records every call.
    #[derive(Default)]
    pub(crate) struct RecordingConnections {
        pub calls: Mutex<Vec<String>>,
    }

    impl RecordingConnections {
        pub fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.calls.lock())
        }
    }

    impl ConnectionManager for RecordingConnections {
        fn add_client(&self, name: &str, addr: &str) {
            self.calls.lock().push(format!("add {name} {addr}"));
        }

        fn remove_client(&self, name: &str) {
            self.calls.lock().push(format!("remove {name}"));
        }
    }

    fn record(node_type: &str, name: &str, listen_addr: &str) -> NodeRecord {
        let mut desc = NodeDescriptor::new(node_type, name);
        desc.listen_addr = listen_addr.to_string();
        desc.to_record("inc")
    }

    #[test]
    fn test_gateway_connects_to_relay_and_disconnects() {
        let recorder = Arc::new(RecordingConnections::default());
        let sync =
            ConnectionSynchronizer::new("frontServer", "front-1", RoutingTable::default(), recorder.clone());

        let chat = record("chatServer", "chat-1", "10.0.0.5:9001");
        sync.on_join(&chat);
        sync.on_leave(&chat);
        assert_eq!(recorder.take(), vec!["add chat-1 10.0.0.5:9001", "remove chat-1"]);
    }

    #[test]
    fn test_unmatched_self_and_unreachable_peers_are_skipped() {
        let recorder = Arc::new(RecordingConnections::default());
        let sync =
            ConnectionSynchronizer::new("chatServer", "chat-1", RoutingTable::default(), recorder.clone());

        sync.on_join(&record("loginServer", "login-1", "10.0.0.7:9001"));
        sync.on_join(&record("chatServer", "chat-1", "10.0.0.5:9001"));
        sync.on_join(&record("frontServer", "front-1", ""));
        sync.on_leave(&record("frontServer", "front-1", ""));
        assert!(recorder.take().is_empty());

        sync.on_join(&record("frontServer", "front-2", "10.0.0.8:9001"));
        assert_eq!(recorder.take(), vec!["add front-2 10.0.0.8:9001"]);
    }
}
