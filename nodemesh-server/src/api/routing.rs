//! Session router handlers

use axum::{extract::State, http::StatusCode, response::Json};
use nodemesh_types::{
    DeleteAssignmentsRequest, RouterError, SelectServerRequest, SelectServerResponse,
    UpdateClientCountRequest,
};
use serde::Serialize;

use crate::state::AppState;

pub(crate) fn status_for(error: &RouterError) -> StatusCode {
    match error {
        RouterError::NoAvailableServer { .. } => StatusCode::SERVICE_UNAVAILABLE,
        RouterError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
        RouterError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        RouterError::Directory(_) => StatusCode::BAD_GATEWAY,
    }
}

fn into_response_error(error: RouterError) -> (StatusCode, String) {
    let status = status_for(&error);
    if status.is_server_error() && !error.is_business_error() {
        tracing::warn!(error = %error, "Router request failed");
    }
    (status, error.to_string())
}

pub async fn select_server(
    State(state): State<AppState>,
    Json(request): Json<SelectServerRequest>,
) -> Result<Json<SelectServerResponse>, (StatusCode, String)> {
    state.router().select_server(&request).await.map(Json).map_err(into_response_error)
}

pub async fn update_client_count(
    State(state): State<AppState>,
    Json(request): Json<UpdateClientCountRequest>,
) -> Result<StatusCode, (StatusCode, String)> {
    state.router().update_client_count(&request).await.map_err(into_response_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Serialize)]
pub struct DeleteAssignmentsResponse {
    pub removed: usize,
}

pub async fn delete_assignments(
    State(state): State<AppState>,
    Json(request): Json<DeleteAssignmentsRequest>,
) -> Result<Json<DeleteAssignmentsResponse>, (StatusCode, String)> {
    let removed = state.router().delete_assignments(&request).await.map_err(into_response_error)?;
    Ok(Json(DeleteAssignmentsResponse { removed }))
}
