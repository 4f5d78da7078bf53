//! Upload, retrieval and pin handlers under `/storage`

use crate::{ApiError, AppState};
use axum::{
    body::Body,
    extract::{
        multipart::MultipartRejection, rejection::QueryRejection, Multipart, Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use cidgate_core::{ChunkOutcome, ChunkRequest, CoreError};
use cidgate_store::StoreError;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Header describing the outcome of the hinted peer dial
pub const PEER_CONNECT_HEADER: &str = "x-peer-connect";
/// Header describing the outcome of pin-on-read
pub const PIN_ON_READ_HEADER: &str = "x-pin-on-read";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cid: Option<String>,
    pub upload_id: String,
}

impl From<ChunkOutcome> for UploadResponse {
    fn from(outcome: ChunkOutcome) -> Self {
        match outcome {
            ChunkOutcome::Partial {
                upload_id,
                chunk_index,
                ..
            } => Self {
                message: format!("Chunk {} received", chunk_index),
                cid: None,
                upload_id,
            },
            ChunkOutcome::Complete { upload_id, cid } => Self::complete(upload_id, cid.to_string()),
        }
    }
}

impl UploadResponse {
    fn complete(upload_id: String, cid: String) -> Self {
        Self {
            message: "File upload complete".to_string(),
            cid: Some(cid),
            upload_id,
        }
    }
}

#[derive(Default)]
struct ChunkForm {
    file: Option<Bytes>,
    chunk_index: Option<String>,
    total_chunks: Option<String>,
    file_name: Option<String>,
    upload_id: Option<String>,
}

/// POST /storage/upload-chunk - accept one chunk of a file
pub async fn upload_chunk(
    State(state): State<Arc<AppState>>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let mut multipart = multipart?;
    let mut form = ChunkForm::default();

    while let Some(field) = multipart.next_field().await? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "file" => form.file = Some(field.bytes().await?),
            "chunkIndex" => form.chunk_index = Some(field.text().await?),
            "totalChunks" => form.total_chunks = Some(field.text().await?),
            "fileName" => form.file_name = Some(field.text().await?),
            "uploadId" => form.upload_id = Some(field.text().await?),
            other => debug!(field = %other, "Ignoring unknown form field"),
        }
    }

    let data = form.file.ok_or_else(|| ApiError::invalid("No file uploaded"))?;
    let request = ChunkRequest::parse(
        form.file_name.as_deref(),
        form.chunk_index.as_deref(),
        form.total_chunks.as_deref(),
        form.upload_id.as_deref(),
    )?;

    let outcome = state.uploads.append_chunk(request, data).await?;
    Ok(Json(UploadResponse::from(outcome)).into_response())
}

/// GET /storage/uploads - in-flight upload sessions
pub async fn list_uploads(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    Ok(Json(state.uploads.sessions().await).into_response())
}

/// POST /storage/uploads/{upload_id}/finalize - retry a failed finalize
pub async fn finalize_upload(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<String>,
) -> Result<Response, ApiError> {
    let cid = state.uploads.retry_finalize(&upload_id).await?;
    Ok(Json(UploadResponse::complete(upload_id, cid.to_string())).into_response())
}

/// DELETE /storage/uploads/{upload_id} - abort an upload
pub async fn abort_upload(
    State(state): State<Arc<AppState>>,
    Path(upload_id): Path<String>,
) -> Result<Response, ApiError> {
    state.uploads.abort(&upload_id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
pub struct RetrieveParams {
    pub cid: Option<String>,
    /// Multiaddress of a peer likely to hold the content
    pub addr: Option<String>,
}

/// GET /storage/getById?cid=&addr= - stream content by CID
pub async fn get_by_id(
    State(state): State<Arc<AppState>>,
    params: Result<Query<RetrieveParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(params) = params?;
    let cid = params
        .cid
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ApiError::invalid("CID is required"))?;

    let mut retrieval = state.retrieval.fetch(&cid, params.addr.as_deref()).await?;
    let peer_connect = retrieval.report.peer_connect.label();
    let pin_on_read = retrieval.report.pin.label();

    // Until the first piece arrives the status line is still ours to set.
    let body = match retrieval.stream.next().await {
        None => Body::empty(),
        Some(Err(e)) => return Err(CoreError::StreamError(e.to_string()).into()),
        Some(Ok(first)) => {
            let head = stream::once(async move { Ok::<_, StoreError>(first) });
            Body::from_stream(head.chain(retrieval.stream))
        }
    };

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"retrieved-file\"",
            ),
            (header::HeaderName::from_static(PEER_CONNECT_HEADER), peer_connect),
            (header::HeaderName::from_static(PIN_ON_READ_HEADER), pin_on_read),
        ],
        body,
    )
        .into_response())
}

/// GET /storage/pinned-files - CIDs pinned by users
pub async fn pinned_files(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let cids: Vec<String> = state
        .pins
        .list_pinned_files()
        .await?
        .iter()
        .map(ToString::to_string)
        .collect();
    Ok(Json(cids).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CidParams {
    pub cid: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PinResponse {
    pub message: &'static str,
    pub cid: String,
}

fn required_cid(params: Result<Query<CidParams>, QueryRejection>) -> Result<String, ApiError> {
    let Query(params) = params?;
    params
        .cid
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| ApiError::invalid("CID is required"))
}

/// GET /storage/pinCID?cid= - pin content
pub async fn pin_cid(
    State(state): State<Arc<AppState>>,
    params: Result<Query<CidParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let cid = state.pins.pin(&required_cid(params)?).await?;
    Ok(Json(PinResponse {
        message: "Pinned",
        cid: cid.to_string(),
    })
    .into_response())
}

/// GET /storage/unpin?cid= - unpin content
pub async fn unpin_cid(
    State(state): State<Arc<AppState>>,
    params: Result<Query<CidParams>, QueryRejection>,
) -> Result<Response, ApiError> {
    let cid = state.pins.unpin(&required_cid(params)?).await?;
    Ok(Json(PinResponse {
        message: "Unpinned",
        cid: cid.to_string(),
    })
    .into_response())
}
