//! Membership and configuration read handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use nodemesh_core::PeerConnection;
use nodemesh_types::NodeRecord;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::state::AppState;

#[derive(Serialize)]
pub struct MembersResponse {
    pub prefix: String,
    pub count: usize,
    /// Directory key to record
    pub members: BTreeMap<String, NodeRecord>,
}

pub async fn list_prefixes(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.mirror().prefixes())
}

pub async fn get_members(
    State(state): State<AppState>,
    Path(prefix): Path<String>,
) -> Json<MembersResponse> {
    let members = state.mirror().read(&prefix);
    Json(MembersResponse { count: members.len(), prefix, members })
}

pub async fn get_peers(State(state): State<AppState>) -> Json<Vec<PeerConnection>> {
    Json(state.peers().snapshot())
}

pub async fn get_config_entries(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<String, String>>, (StatusCode, String)> {
    state.registry().list_config().await.map(Json).map_err(|e| {
        tracing::warn!(error = %e, "Failed to list config entries");
        (StatusCode::BAD_GATEWAY, e.to_string())
    })
}
