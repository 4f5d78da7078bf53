//! Swarm handlers under `/peers`

use crate::{ApiError, AppState};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    response::{IntoResponse, Response},
    Json,
};
use cidgate_core::format_latency;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRequest {
    /// Multiaddress to dial
    pub peer_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: &'static str,
}

/// POST /peers - connect to a peer by multiaddress
pub async fn add_peer(
    State(state): State<Arc<AppState>>,
    body: Result<Json<PeerRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body?;
    let address = body.peer_id.unwrap_or_default();
    state.peers.connect(&address).await?;
    Ok(Json(MessageResponse {
        message: "New peer has been added",
    })
    .into_response())
}

/// GET /peers - peers the node is connected to
pub async fn list_peers(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    Ok(Json(state.peers.list_connected_peers().await?).into_response())
}

/// GET /peers/{peer_id} - identity of one peer
pub async fn peer_info(
    State(state): State<Arc<AppState>>,
    Path(peer_id): Path<String>,
) -> Result<Response, ApiError> {
    Ok(Json(state.peers.peer_info(&peer_id).await?).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyParams {
    pub peer_id: Option<String>,
}

/// GET /peers/get-latency?peerId= - round trip of the first successful ping
pub async fn get_latency(
    State(state): State<Arc<AppState>>,
    params: Result<Query<LatencyParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params?;
    let peer = params.peer_id.unwrap_or_default();
    let latency = state.peers.measure_latency(&peer).await?;
    Ok(Json(format_latency(latency)).into_response())
}
