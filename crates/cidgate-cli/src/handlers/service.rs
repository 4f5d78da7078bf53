//! Service-level handlers

use crate::{ApiError, AppState};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;

/// GET /ipfs - identity of the local daemon
pub async fn node_identity(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    Ok(Json(state.peers.node_identity().await?).into_response())
}

/// GET|HEAD /health - Health check
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}
