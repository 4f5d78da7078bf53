//! Gateway response types

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Reply to a chunk upload
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    pub message: String,
    pub cid: Option<String>,
    pub upload_id: String,
}

/// Result of a completed upload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadResult {
    pub cid: String,
    pub upload_id: String,
}

/// Progress callback type
pub type ProgressCallback = Box<dyn Fn(UploadProgress) + Send + Sync>;

/// Upload progress information
#[derive(Clone, Debug)]
pub struct UploadProgress {
    /// Bytes uploaded so far
    pub bytes_uploaded: u64,
    /// Total bytes to upload
    pub total_bytes: u64,
    /// Chunks acknowledged so far
    pub chunks_sent: u64,
    /// Total number of chunks
    pub total_chunks: u64,
}

impl UploadProgress {
    /// Get percentage complete
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.bytes_uploaded as f64 / self.total_bytes as f64) * 100.0
    }
}

/// An in-flight upload session
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    pub upload_id: String,
    pub file_name: String,
    pub total_chunks: u64,
    pub received_chunks: u64,
    pub bytes_received: u64,
    pub created_at: DateTime<Utc>,
    pub status: String,
    pub last_error: Option<String>,
}

/// How a retrieval's best-effort steps went
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetrievalOutcome {
    /// `skipped`, `succeeded` or `failed`
    pub peer_connect: Option<String>,
    /// `succeeded` or `failed`
    pub pin_on_read: Option<String>,
    /// Bytes written
    pub bytes: u64,
}

/// A connected swarm peer
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
    pub address: String,
    pub peer_id: String,
    pub latency_ms: Option<u64>,
}

/// Identity of a node
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeIdentity {
    pub id: String,
    #[serde(default)]
    pub public_key: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub agent_version: String,
    #[serde(default)]
    pub protocol_version: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PinResponse {
    pub cid: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percentage() {
        let progress = UploadProgress {
            bytes_uploaded: 25,
            total_bytes: 100,
            chunks_sent: 1,
            total_chunks: 4,
        };
        assert_eq!(progress.percentage(), 25.0);

        let empty = UploadProgress {
            total_bytes: 0,
            bytes_uploaded: 0,
            ..progress
        };
        assert_eq!(empty.percentage(), 100.0);
    }

    #[test]
    fn test_session_deserialize() {
        let json = r#"{"uploadId":"u1","fileName":"a.bin","totalChunks":3,"receivedChunks":1,
            "bytesReceived":10,"createdAt":"2024-05-01T10:00:00Z","status":"finalizeFailed",
            "lastError":"daemon down"}"#;
        let session: UploadSession = serde_json::from_str(json).unwrap();
        assert_eq!(session.status, "finalizeFailed");
        assert_eq!(session.last_error.as_deref(), Some("daemon down"));
    }
}
