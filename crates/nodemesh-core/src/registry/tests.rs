#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::*;
use crate::directory::MemoryDirectory;
use crate::synchronizer::tests::RecordingConnections;
use crate::synchronizer::ConnectionSynchronizer;
use nodemesh_types::config_key;

fn config(name: &str) -> NodeConfig {
    let mut desc = NodeDescriptor::new("frontServer", name);
    desc.ws_addr = format!("{name}:3653");
    let mut config = NodeConfig::new(desc);
    config.lease_ttl_secs = 3;
    config.keep_alive_interval_secs = Some(1);
    config.keep_alive_timeout_secs = 1;
    config
}

fn registry_for(directory: Arc<MemoryDirectory>, config: &NodeConfig) -> Arc<MembershipRegistry> {
    let local = LocalNode::new(config.node.clone());
    let synchronizer = Arc::new(ConnectionSynchronizer::new(
        config.node.node_type.as_str(),
        config.node.name.as_str(),
        config.routing_table.clone(),
        Arc::new(RecordingConnections::default()),
    ));
    let mirror = ClusterMirror::new(directory.clone(), synchronizer, local.key());
    MembershipRegistry::new(directory, mirror, local, RegistrySettings::from(config))
}

#[tokio::test]
async fn test_register_writes_record_under_lease() {
    let directory = MemoryDirectory::new();
    let registry = registry_for(directory.clone(), &config("front-1"));

    let lease = registry.register().await.unwrap();
    let stored = directory.get("frontServer/front-1").await.unwrap().unwrap();
    assert_eq!(stored.lease, Some(lease));

    let record = NodeRecord::decode(&stored.value).unwrap();
    assert_eq!(record.incarnation_id, registry.local().incarnation_id());
    assert_eq!(record.ws_addr, "front-1:3653");
    assert!(registry.mirror.get("frontServer", "frontServer/front-1").is_some());

    let err = registry.register().await.unwrap_err();
    assert!(matches!(err, RegistryError::AlreadyRegistered { .. }));
    registry.deregister().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_directory_aborts_registration() {
    let directory = MemoryDirectory::new();
    directory.close().await.unwrap();
    let registry = registry_for(directory, &config("front-1"));

    let err = registry.register().await.unwrap_err();
    assert_eq!(err, RegistryError::Connect(DirectoryError::Closed));
    assert!(registry.current_lease().is_none());
}

#[tokio::test]
async fn test_deregister_removes_record_and_closes() {
    let directory = MemoryDirectory::new();
    let registry = registry_for(directory.clone(), &config("front-1"));
    registry.register().await.unwrap();

    registry.deregister().await.unwrap();
    assert_eq!(directory.lease_count(), 0);
    assert!(directory.is_closed());
    assert!(registry.current_lease().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_keep_alive_outlives_ttl() {
    let directory = MemoryDirectory::new();
    let registry = registry_for(directory.clone(), &config("front-1"));
    registry.register().await.unwrap();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(directory.expire_now(), 0);
    assert!(directory.get("frontServer/front-1").await.unwrap().is_some());
    registry.deregister().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_failed_renewals_let_the_lease_expire() {
    let directory = MemoryDirectory::new();
    let registry = registry_for(directory.clone(), &config("front-1"));
    let lease = registry.register().await.unwrap();
    directory.fail_keep_alive(lease, true);

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(directory.expire_now(), 1);
    assert!(directory.get("frontServer/front-1").await.unwrap().is_none());
}

#[tokio::test]
async fn test_reregister_policy_restores_lost_record() {
    let directory = MemoryDirectory::new();
    let mut config = config("front-1");
    config.self_loss_policy = SelfLossPolicy::Reregister;
    let registry = registry_for(directory.clone(), &config);
    let first = registry.register().await.unwrap();

    directory.revoke(first).await.unwrap();

    let mut restored = None;
    for _ in 0..100 {
        if let Some(kv) = directory.get("frontServer/front-1").await.unwrap() {
            restored = Some(kv);
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let restored = restored.expect("record was not rewritten");
    assert_ne!(restored.lease, Some(first));
    assert_eq!(restored.lease, registry.current_lease());

    let record = NodeRecord::decode(&restored.value).unwrap();
    assert_eq!(record.incarnation_id, registry.local().incarnation_id());
    registry.deregister().await.unwrap();
}

#[tokio::test]
async fn test_list_config_returns_entries_by_name() {
    let directory = MemoryDirectory::new();
    directory.put(&config_key("motd"), b"hello".to_vec()).await.unwrap();
    directory.put(&config_key("limits"), br#"{"max":5}"#.to_vec()).await.unwrap();
    directory.put(&config_key("binary"), vec![0xff, 0xfe]).await.unwrap();
    directory.put("configuration/other", b"x".to_vec()).await.unwrap();
    let registry = registry_for(directory, &config("front-1"));

    let entries = registry.list_config().await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries["motd"], "hello");
    assert_eq!(entries["limits"], r#"{"max":5}"#);
}
