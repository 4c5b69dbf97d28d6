#![allow(clippy::unwrap_used)]

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;

use nodemesh_core::Directory;
use nodemesh_types::config_key;

use super::health_check;
use super::members::{get_config_entries, get_members, get_peers, list_prefixes};
use crate::test_helpers::{chat_record, settle, test_app_state};

#[tokio::test]
async fn test_health_reports_registration() {
    let (state, _directory) = test_app_state().await;
    let (code, Json(health)) = health_check(State(state.clone())).await;

    assert_eq!(code, StatusCode::OK);
    assert_eq!(health.status, "ok");
    assert_eq!(health.node, "frontServer/front-1");
    assert!(health.lease.is_some());
    assert_eq!(health.members.get("frontServer"), Some(&1));
    assert_eq!(health.members.get("chatServer"), Some(&0));

    state.node().shutdown().await.unwrap();
    let (code, Json(health)) = health_check(State(state)).await;
    assert_eq!(code, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(health.status, "unregistered");
}

#[tokio::test]
async fn test_members_and_peers_follow_directory() {
    let (state, directory) = test_app_state().await;
    let record = chat_record("chat-1", 4);
    directory.put(&record.directory_key(), record.encode().unwrap()).await.unwrap();
    settle(|| state.mirror().len("chatServer") == 1).await;

    let Json(members) = get_members(State(state.clone()), Path("chatServer".to_string())).await;
    assert_eq!(members.count, 1);
    assert_eq!(members.members["chatServer/chat-1"].client_count, 4);

    let Json(peers) = get_peers(State(state.clone())).await;
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].addr, "chat-1:9001");

    let Json(unknown) = get_members(State(state.clone()), Path("loginServer".to_string())).await;
    assert_eq!(unknown.count, 0);

    let Json(prefixes) = list_prefixes(State(state)).await;
    assert_eq!(prefixes, vec!["chatServer", "frontServer"]);
}

#[tokio::test]
async fn test_config_entries() {
    let (state, directory) = test_app_state().await;
    directory.put(&config_key("motd"), b"welcome".to_vec()).await.unwrap();

    let Json(entries) = get_config_entries(State(state.clone())).await.unwrap();
    assert_eq!(entries.get("motd").map(String::as_str), Some("welcome"));

    directory.close().await.unwrap();
    let (code, _) = get_config_entries(State(state)).await.unwrap_err();
    assert_eq!(code, StatusCode::BAD_GATEWAY);
}
