//! Error types for the cidgate-core crate

use cidgate_store::StoreError;
use thiserror::Error;

/// Result type alias using `CoreError`
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised by the gateway services
#[derive(Error, Debug)]
pub enum CoreError {
    /// A request precondition failed before any I/O
    #[error("{0}")]
    InvalidRequest(String),

    /// The identifier is not a syntactically valid CID
    #[error("invalid CID: {0}")]
    InvalidCid(String),

    /// Ingest or pin bookkeeping in the content store failed
    #[error("storage failure: {message}")]
    StorageFailure {
        message: String,
        #[source]
        source: StoreError,
    },

    /// The content store could not start a read
    #[error("retrieval failed for {cid}: {source}")]
    RetrievalFailure {
        cid: String,
        #[source]
        source: StoreError,
    },

    /// A started transfer broke off
    #[error("stream error: {0}")]
    StreamError(String),

    /// Dialing a peer failed
    #[error("failed to connect to {address}: {reason}")]
    ConnectionFailure { address: String, reason: String },

    /// No usable round trip was measured
    #[error("latency probe failed for {peer}: {reason}")]
    ProbeFailed { peer: String, reason: String },

    /// No upload session with this id
    #[error("upload session not found: {0}")]
    SessionNotFound(String),

    /// The daemon does not know this peer
    #[error("peer not found: {0}")]
    PeerNotFound(String),

    /// Staging I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Wrap a store error raised while storing or pinning
    pub fn storage(message: impl Into<String>, source: StoreError) -> Self {
        CoreError::StorageFailure {
            message: message.into(),
            source,
        }
    }
}
