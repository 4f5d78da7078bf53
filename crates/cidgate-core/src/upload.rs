//! Chunked upload assembly
//!
//! Clients send a file as a sequence of indexed chunks. Each upload is a
//! session keyed by a UUID `uploadId`; chunks are appended in order to
//! `<staging_dir>/<upload_id>.part` and the final chunk streams the staging
//! file into the content store.
//!
//! A session whose finalize failed keeps its staging file. It can be
//! finalized again with [`UploadAssembler::retry_finalize`] or by resending
//! the final chunk.

use crate::{CoreError, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use cid::Cid;
use cidgate_store::stream::{file_stream, DEFAULT_READ_CHUNK};
use cidgate_store::ContentStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::cmp::Ordering;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Configuration for the upload assembler
#[derive(Clone, Debug)]
pub struct UploadConfig {
    /// Directory holding one `.part` file per in-flight session
    pub staging_dir: PathBuf,
    /// Sessions older than this are dropped by `cleanup_expired`
    pub session_expiry: Duration,
    /// Read size when streaming a staging file into the store
    pub read_chunk: usize,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from("uploads"),
            session_expiry: Duration::from_secs(24 * 3600),
            read_chunk: DEFAULT_READ_CHUNK,
        }
    }
}

impl UploadConfig {
    /// Default configuration staging under `dir`
    pub fn with_staging_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: dir.into(),
            ..Default::default()
        }
    }
}

/// A validated chunk submission
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkRequest {
    /// Client-side file name, kept as metadata only
    pub file_name: String,
    pub chunk_index: u64,
    pub total_chunks: u64,
    pub upload_id: Option<String>,
}

impl ChunkRequest {
    /// Validate raw form fields.
    ///
    /// Fails with `InvalidRequest` on a missing field, a non-numeric or
    /// negative index, a non-positive total, or an index past the total.
    pub fn parse(
        file_name: Option<&str>,
        chunk_index: Option<&str>,
        total_chunks: Option<&str>,
        upload_id: Option<&str>,
    ) -> Result<Self> {
        let (Some(file_name), Some(chunk_index), Some(total_chunks)) = (
            non_empty(file_name),
            non_empty(chunk_index),
            non_empty(total_chunks),
        ) else {
            return Err(CoreError::InvalidRequest("Missing required fields".to_string()));
        };

        let invalid = || CoreError::InvalidRequest("Invalid chunk index or total chunks".to_string());
        let chunk_index: i64 = chunk_index.parse().map_err(|_| invalid())?;
        let total_chunks: i64 = total_chunks.parse().map_err(|_| invalid())?;
        if chunk_index < 0 || total_chunks <= 0 || chunk_index >= total_chunks {
            return Err(invalid());
        }

        Ok(Self {
            file_name: file_name.to_string(),
            chunk_index: chunk_index as u64,
            total_chunks: total_chunks as u64,
            upload_id: non_empty(upload_id).map(str::to_string),
        })
    }

    /// Whether this chunk completes the upload
    pub fn is_final(&self) -> bool {
        self.chunk_index + 1 == self.total_chunks
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Result of accepting one chunk
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// More chunks are expected
    Partial {
        upload_id: String,
        chunk_index: u64,
        /// The chunk had already been received and was not appended again
        duplicate: bool,
    },
    /// The upload was stored under `cid`
    Complete { upload_id: String, cid: Cid },
}

impl ChunkOutcome {
    pub fn upload_id(&self) -> &str {
        match self {
            Self::Partial { upload_id, .. } | Self::Complete { upload_id, .. } => upload_id,
        }
    }
}

/// Lifecycle of a session
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Receiving,
    FinalizeFailed,
}

/// An in-flight upload as reported to operators
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub upload_id: String,
    pub file_name: String,
    pub total_chunks: u64,
    pub received_chunks: u64,
    pub bytes_received: u64,
    pub created_at: DateTime<Utc>,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

struct UploadSession {
    id: String,
    file_name: String,
    total_chunks: u64,
    next_expected: u64,
    bytes_received: u64,
    staging_path: PathBuf,
    created_at: DateTime<Utc>,
    status: SessionStatus,
    last_error: Option<String>,
    /// Set once the session left the table; late lockers must not touch it
    closed: bool,
}

impl UploadSession {
    fn summary(&self) -> SessionSummary {
        SessionSummary {
            upload_id: self.id.clone(),
            file_name: self.file_name.clone(),
            total_chunks: self.total_chunks,
            received_chunks: self.next_expected,
            bytes_received: self.bytes_received,
            created_at: self.created_at,
            status: self.status,
            last_error: self.last_error.clone(),
        }
    }
}

/// Table entry. Name and age are readable without taking the session lock.
#[derive(Clone)]
struct SessionSlot {
    file_name: String,
    created_at: DateTime<Utc>,
    session: Arc<Mutex<UploadSession>>,
}

/// Reassembles chunked uploads and hands them to the content store
pub struct UploadAssembler<S: ContentStore> {
    store: Arc<S>,
    config: UploadConfig,
    sessions: DashMap<String, SessionSlot>,
}

impl<S: ContentStore> UploadAssembler<S> {
    /// Create an assembler staging under `config.staging_dir`
    pub fn new(store: Arc<S>, config: UploadConfig) -> Self {
        Self {
            store,
            config,
            sessions: DashMap::new(),
        }
    }

    /// The configuration in use
    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Staging file location for a session
    pub fn staging_path(&self, upload_id: &str) -> PathBuf {
        self.config.staging_dir.join(format!("{}.part", upload_id))
    }

    /// Number of in-flight sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Accept one chunk, finalizing the upload when it is the last one
    #[instrument(skip(self, data), fields(file_name = %request.file_name, chunk = request.chunk_index, total = request.total_chunks, size = data.len()))]
    pub async fn append_chunk(&self, request: ChunkRequest, data: Bytes) -> Result<ChunkOutcome> {
        let slot = self.resolve_session(&request)?;
        let mut session = slot.session.lock().await;
        if session.closed {
            return Err(CoreError::SessionNotFound(session.id.clone()));
        }

        if session.total_chunks != request.total_chunks {
            return Err(CoreError::InvalidRequest(format!(
                "totalChunks {} does not match the {} declared for upload {}",
                request.total_chunks, session.total_chunks, session.id
            )));
        }

        match request.chunk_index.cmp(&session.next_expected) {
            Ordering::Greater => Err(CoreError::InvalidRequest(format!(
                "chunk {} received out of order; expected chunk {}",
                request.chunk_index, session.next_expected
            ))),
            Ordering::Less => {
                if request.is_final() && session.status == SessionStatus::FinalizeFailed {
                    let cid = self.finalize(&mut session).await?;
                    return Ok(ChunkOutcome::Complete {
                        upload_id: session.id.clone(),
                        cid,
                    });
                }
                debug!(upload_id = %session.id, "Duplicate chunk acknowledged");
                Ok(ChunkOutcome::Partial {
                    upload_id: session.id.clone(),
                    chunk_index: request.chunk_index,
                    duplicate: true,
                })
            }
            Ordering::Equal => {
                append_to_staging(&session.staging_path, session.bytes_received, &data).await?;
                session.next_expected += 1;
                session.bytes_received += data.len() as u64;
                debug!(
                    upload_id = %session.id,
                    received = session.next_expected,
                    bytes = session.bytes_received,
                    "Chunk appended"
                );

                if !request.is_final() {
                    return Ok(ChunkOutcome::Partial {
                        upload_id: session.id.clone(),
                        chunk_index: request.chunk_index,
                        duplicate: false,
                    });
                }

                let cid = self.finalize(&mut session).await?;
                Ok(ChunkOutcome::Complete {
                    upload_id: session.id.clone(),
                    cid,
                })
            }
        }
    }

    /// Re-ingest the staged bytes of a fully received session
    #[instrument(skip(self))]
    pub async fn retry_finalize(&self, upload_id: &str) -> Result<Cid> {
        let slot = self.lookup(upload_id)?;
        let mut session = slot.session.lock().await;
        if session.closed {
            return Err(CoreError::SessionNotFound(upload_id.to_string()));
        }
        if session.next_expected < session.total_chunks {
            return Err(CoreError::InvalidRequest(format!(
                "upload {} has received {} of {} chunks",
                upload_id, session.next_expected, session.total_chunks
            )));
        }
        self.finalize(&mut session).await
    }

    /// Drop a session and its staging file
    #[instrument(skip(self))]
    pub async fn abort(&self, upload_id: &str) -> Result<()> {
        let (_, slot) = self
            .sessions
            .remove(upload_id)
            .ok_or_else(|| CoreError::SessionNotFound(upload_id.to_string()))?;
        let mut session = slot.session.lock().await;
        session.closed = true;
        discard_staging(&session.staging_path).await;
        info!(upload_id = %upload_id, "Upload aborted");
        Ok(())
    }

    /// Snapshot of in-flight sessions, oldest first
    pub async fn sessions(&self) -> Vec<SessionSummary> {
        let slots: Vec<SessionSlot> = self.sessions.iter().map(|r| r.value().clone()).collect();
        let mut summaries = Vec::with_capacity(slots.len());
        for slot in slots {
            let session = slot.session.lock().await;
            if !session.closed {
                summaries.push(session.summary());
            }
        }
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }

    /// Drop sessions older than the configured expiry, returning how many
    pub async fn cleanup_expired(&self) -> usize {
        let now = Utc::now();
        let expiry = self.config.session_expiry;
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|r| {
                (now - r.created_at)
                    .to_std()
                    .map(|age| age >= expiry)
                    .unwrap_or(false)
            })
            .map(|r| r.key().clone())
            .collect();

        let mut count = 0;
        for id in expired {
            if let Some((_, slot)) = self.sessions.remove(&id) {
                let mut session = slot.session.lock().await;
                session.closed = true;
                discard_staging(&session.staging_path).await;
                count += 1;
            }
        }
        if count > 0 {
            info!(count, "Expired upload sessions removed");
        }
        count
    }

    fn lookup(&self, upload_id: &str) -> Result<SessionSlot> {
        self.sessions
            .get(upload_id)
            .map(|r| r.value().clone())
            .ok_or_else(|| CoreError::SessionNotFound(upload_id.to_string()))
    }

    fn resolve_session(&self, request: &ChunkRequest) -> Result<SessionSlot> {
        match &request.upload_id {
            Some(raw) => {
                let id = Uuid::parse_str(raw)
                    .map_err(|_| CoreError::InvalidRequest(format!("uploadId {} is not a UUID", raw)))?
                    .to_string();
                if request.chunk_index == 0 {
                    Ok(self.open_session(id, request))
                } else {
                    self.lookup(&id)
                }
            }
            None if request.chunk_index == 0 => {
                Ok(self.open_session(Uuid::new_v4().to_string(), request))
            }
            None => {
                let mut matches = self
                    .sessions
                    .iter()
                    .filter(|r| r.file_name == request.file_name)
                    .map(|r| r.value().clone());
                match (matches.next(), matches.next()) {
                    (Some(slot), None) => Ok(slot),
                    (None, _) => Err(CoreError::InvalidRequest(format!(
                        "no upload in progress for {}; send uploadId",
                        request.file_name
                    ))),
                    (Some(_), Some(_)) => Err(CoreError::InvalidRequest(format!(
                        "several uploads in progress for {}; send uploadId",
                        request.file_name
                    ))),
                }
            }
        }
    }

    /// Return the session under `id`, creating it if absent
    fn open_session(&self, id: String, request: &ChunkRequest) -> SessionSlot {
        match self.sessions.entry(id) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                let created_at = Utc::now();
                let session = UploadSession {
                    id: entry.key().clone(),
                    file_name: request.file_name.clone(),
                    total_chunks: request.total_chunks,
                    next_expected: 0,
                    bytes_received: 0,
                    staging_path: self.staging_path(entry.key()),
                    created_at,
                    status: SessionStatus::Receiving,
                    last_error: None,
                    closed: false,
                };
                info!(upload_id = %session.id, file_name = %session.file_name, total = session.total_chunks, "Upload session opened");
                entry
                    .insert(SessionSlot {
                        file_name: request.file_name.clone(),
                        created_at,
                        session: Arc::new(Mutex::new(session)),
                    })
                    .clone()
            }
        }
    }

    /// Stream the staging file into the store. The caller holds the session lock.
    async fn finalize(&self, session: &mut UploadSession) -> Result<Cid> {
        let file = tokio::fs::File::open(&session.staging_path).await?;
        let data = file_stream(file, self.config.read_chunk);

        match self.store.ingest(data).await {
            Ok(cid) => {
                session.closed = true;
                self.sessions.remove(&session.id);
                discard_staging(&session.staging_path).await;
                info!(
                    upload_id = %session.id,
                    cid = %cid,
                    bytes = session.bytes_received,
                    "Upload finalized"
                );
                Ok(cid)
            }
            Err(e) => {
                warn!(
                    upload_id = %session.id,
                    staging = %session.staging_path.display(),
                    error = %e,
                    "Finalize failed, staging file retained"
                );
                session.status = SessionStatus::FinalizeFailed;
                session.last_error = Some(e.to_string());
                Err(CoreError::storage(
                    format!("failed to store upload {}", session.id),
                    e,
                ))
            }
        }
    }
}

/// Write `data` at `offset`, the number of bytes already accepted.
///
/// Anything past `offset` is left over from a write that failed part way
/// and is cut off first, so a resent chunk lands exactly where it belongs.
async fn append_to_staging(path: &Path, offset: u64, data: &[u8]) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)
        .await?;
    file.set_len(offset).await?;
    file.seek(SeekFrom::Start(offset)).await?;

    let written: std::io::Result<()> = async {
        file.write_all(data).await?;
        file.flush().await
    }
    .await;

    if let Err(e) = written {
        if let Err(trim) = file.set_len(offset).await {
            warn!(path = %path.display(), error = %trim, "Failed to trim staging file after a failed write");
        }
        return Err(e.into());
    }
    Ok(())
}

async fn discard_staging(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staging file"),
    }
}
