//! Client error types

use serde::Deserialize;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Error reported by the gateway
    #[error("Gateway error ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        request_id: Option<String>,
    },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid response
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A streamed download went silent
    #[error("Download stalled: no data for {0:?}")]
    Stalled(std::time::Duration),

    /// Upload failed
    #[error("Upload failed: {0}")]
    UploadFailed(String),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
    request_id: Option<String>,
}

impl ClientError {
    /// Build an error from a gateway response body
    pub fn from_body(body: &str, status: u16) -> Self {
        let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
        let (code, message, request_id) = match parsed {
            Some(body) => (body.error, body.message, body.request_id),
            None => (None, None, None),
        };
        let message = message.unwrap_or_else(|| {
            if body.trim().is_empty() {
                "Unknown error".to_string()
            } else {
                body.trim().to_string()
            }
        });

        Self::Api {
            status,
            code: code.unwrap_or_else(|| format!("HTTP{}", status)),
            message,
            request_id,
        }
    }

    /// The gateway's error code, if this came from the gateway
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }

    /// Check if the request was rejected as malformed
    pub fn is_invalid_request(&self) -> bool {
        matches!(self, Self::Api { status: 400, .. })
    }

    /// Check if the gateway asked the client to slow down
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Api { status: 429, .. })
    }
}
