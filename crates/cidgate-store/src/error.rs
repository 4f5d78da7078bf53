//! Error types for the cidgate-store crate

use std::time::Duration;
use thiserror::Error;

/// Result type alias using `StoreError`
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur while talking to the content store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Content not found
    #[error("content not found: {0}")]
    NotFound(String),

    /// Invalid CID
    #[error("invalid CID: {0}")]
    InvalidCid(String),

    /// The daemon answered but rejected the request
    #[error("IPFS API error: {0}")]
    Api(String),

    /// Connection error
    #[error("connection error: {0}")]
    Connection(String),

    /// Swarm connect to a remote peer failed
    #[error("peer connect failed for {address}: {reason}")]
    PeerConnect { address: String, reason: String },

    /// Timeout error
    #[error("operation timed out after {seconds}s")]
    Timeout { seconds: u64 },

    /// No bytes arrived on a live stream within the stall window
    #[error("stream stalled: no data for {seconds}s")]
    Stalled { seconds: u64 },

    /// A sized stream ended before its announced length
    #[error("stream ended after {received} of {expected} bytes")]
    Truncated { received: u64, expected: u64 },

    /// The store was switched offline (memory store only)
    #[error("content store is offline")]
    Offline,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl StoreError {
    /// Timeout error for a given deadline
    pub fn timeout(deadline: Duration) -> Self {
        StoreError::Timeout {
            seconds: deadline.as_secs(),
        }
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            StoreError::Timeout { seconds: 30 }
        } else if err.is_connect() {
            StoreError::Connection(err.to_string())
        } else {
            StoreError::Http(err.to_string())
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<cid::Error> for StoreError {
    fn from(err: cid::Error) -> Self {
        StoreError::InvalidCid(err.to_string())
    }
}
