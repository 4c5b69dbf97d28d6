//! Two mesh nodes sharing one directory.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use nodemesh_core::{ConnectionManager, Directory, MeshNode, MemoryDirectory, PeerTable};
use nodemesh_types::{
    NodeConfig, NodeDescriptor, NodeRecord, RouterError, SelectServerRequest, UpdateClientCountRequest,
};
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn chat_config(name: &str) -> NodeConfig {
    let mut desc = NodeDescriptor::new("chatServer", name);
    desc.ws_addr = format!("ws://{name}:3653");
    desc.listen_addr = format!("{name}:9001");
    desc.max_client_count = 100;
    let mut config = NodeConfig::new(desc);
    config.watch_prefixes = vec!["frontServer".to_string()];
    config.lease_ttl_secs = 3;
    config.keep_alive_interval_secs = Some(1);
    config.keep_alive_timeout_secs = 1;
    config
}

fn front_config(name: &str) -> NodeConfig {
    let mut config = NodeConfig::new(NodeDescriptor::new("frontServer", name));
    config.watch_prefixes = vec!["chatServer".to_string()];
    config.lease_ttl_secs = 3;
    config.keep_alive_interval_secs = Some(1);
    config.keep_alive_timeout_secs = 1;
    config
}

async fn settle<F: Fn() -> bool>(check: F) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("cluster did not converge");
}

#[tokio::test]
async fn test_gateway_connects_routes_and_counts() {
    init_tracing();
    let directory = MemoryDirectory::new();
    let chat_peers = Arc::new(PeerTable::new());
    let front_peers = Arc::new(PeerTable::new());

    let chat = MeshNode::start(&chat_config("chat-1"), directory.clone(), chat_peers.clone()).await.unwrap();
    let front =
        MeshNode::start(&front_config("front-1"), directory.clone(), front_peers.clone()).await.unwrap();

    // The gateway dials the relay straight from the seed read.
    assert_eq!(front_peers.addr("chat-1").as_deref(), Some("chat-1:9001"));
    // The gateway advertises no listen address, so the relay never dials it.
    assert!(chat_peers.is_empty());

    let picked = front.router().select_server(&SelectServerRequest::new("chatServer")).await.unwrap();
    assert_eq!(picked.server_name, "chat-1");
    assert_eq!(picked.client_addr, "ws://chat-1:3653");

    front
        .router()
        .update_client_count(&UpdateClientCountRequest::new("chatServer", "chat-1", 100))
        .await
        .unwrap();
    let stored = directory.get("chatServer/chat-1").await.unwrap().unwrap();
    assert_eq!(stored.lease, chat.registry().current_lease());
    assert_eq!(NodeRecord::decode(&stored.value).unwrap().client_count, 100);

    // The relay sees its own updated count through its mirror too.
    settle(|| chat.mirror().get("chatServer", "chatServer/chat-1").is_some_and(|r| r.client_count == 100))
        .await;

    let err = front.router().select_server(&SelectServerRequest::new("chatServer")).await.unwrap_err();
    assert!(matches!(err, RouterError::NoAvailableServer { .. }));

    front.registry().deregister().await.unwrap();
    assert!(directory.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_missed_renewals_remove_node_from_peer_mirror() {
    init_tracing();
    let directory = MemoryDirectory::new();
    let front_peers = Arc::new(PeerTable::new());

    let chat = MeshNode::start(&chat_config("chat-1"), directory.clone(), Arc::new(PeerTable::new()))
        .await
        .unwrap();
    let front =
        MeshNode::start(&front_config("front-1"), directory.clone(), front_peers.clone()).await.unwrap();
    assert_eq!(front.mirror().len("chatServer"), 1);
    assert!(front_peers.contains("chat-1"));

    let lease = chat.registry().current_lease().unwrap();
    directory.fail_keep_alive(lease, true);

    // Renewals at 1s, 2s and 3s all fail; the 3s TTL runs out.
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(directory.expire_now(), 1);

    settle(|| front.mirror().get("chatServer", "chatServer/chat-1").is_none()).await;
    assert!(!front_peers.contains("chat-1"));

    // The gateway kept renewing and is still registered.
    assert!(directory.get("frontServer/front-1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_start_fails_cleanly_on_closed_directory() {
    init_tracing();
    let directory = MemoryDirectory::new();
    directory.close().await.unwrap();
    let peers: Arc<dyn ConnectionManager> = Arc::new(PeerTable::new());

    let err = MeshNode::start(&front_config("front-1"), directory.clone(), peers).await.err().unwrap();
    assert!(err.to_string().contains("Failed to connect"));
    assert_eq!(directory.lease_count(), 0);
}
