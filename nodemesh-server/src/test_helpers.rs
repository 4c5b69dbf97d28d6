//! Test helpers for nodemesh-server unit tests.

use std::sync::Arc;

use nodemesh_core::{MeshNode, MemoryDirectory, PeerTable};
use nodemesh_types::{NodeConfig, NodeDescriptor, NodeRecord};

use crate::state::AppState;

/// A registered gateway node mirroring `chatServer`, over a fresh in-process directory.
///
/// Returns `(AppState, MemoryDirectory)` so tests can seed the directory.
pub async fn test_app_state() -> (AppState, Arc<MemoryDirectory>) {
    let directory = MemoryDirectory::new();
    let mut config = NodeConfig::new(NodeDescriptor::new("frontServer", "front-1"));
    config.watch_prefixes = vec!["chatServer".to_string()];

    let peers = Arc::new(PeerTable::new());
    let node = MeshNode::start(&config, directory.clone(), peers.clone())
        .await
        .expect("failed to start test node");

    (AppState::new(node, peers, config), directory)
}

pub fn chat_record(name: &str, client_count: u32) -> NodeRecord {
    let mut desc = NodeDescriptor::new("chatServer", name);
    desc.ws_addr = format!("ws://{name}:3653");
    desc.listen_addr = format!("{name}:9001");
    desc.max_client_count = 100;
    let mut record = desc.to_record("inc-test");
    record.client_count = client_count;
    record
}

/// Wait until `check` holds, polling the mirror.
pub async fn settle<F: Fn() -> bool>(check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("state did not converge");
}
