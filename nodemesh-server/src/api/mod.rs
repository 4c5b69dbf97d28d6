//! API Routes
//!
//! HTTP control surface over the mirror, the registry and the session router.

mod members;
mod routing;

#[cfg(test)]
mod members_tests;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        // Membership
        .route("/members", get(members::list_prefixes))
        .route("/members/:prefix", get(members::get_members))
        .route("/peers", get(members::get_peers))
        .route("/config", get(members::get_config_entries))
        // Session routing
        .route("/select", post(routing::select_server))
        .route("/client-count", post(routing::update_client_count))
        .route("/assignments/delete", post(routing::delete_assignments))
        .fallback(api_not_found)
}

async fn api_not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": "Not found"})))
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: String,
    pub node: String,
    pub incarnation_id: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub lease: Option<String>,
    pub uptime_secs: u64,
    /// Mirrored record count per prefix
    pub members: BTreeMap<String, usize>,
    pub peers: usize,
}

pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let local = state.registry().local();
    let lease = state.registry().current_lease();
    let mirror = state.mirror();
    let members = mirror.prefixes().into_iter().map(|p| (p.clone(), mirror.len(&p))).collect();

    // A node without a lease is not visible to the cluster.
    let (code, status) = match lease {
        Some(_) => (StatusCode::OK, "ok"),
        None => (StatusCode::SERVICE_UNAVAILABLE, "unregistered"),
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION").to_string(),
            node: local.key().directory_key(),
            incarnation_id: local.incarnation_id().to_string(),
            started_at: local.started_at(),
            lease: lease.map(|l| l.to_string()),
            uptime_secs: state.uptime_secs(),
            members,
            peers: state.peers().len(),
        }),
    )
}
