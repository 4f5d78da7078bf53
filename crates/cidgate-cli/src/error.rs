//! Error types and gateway error codes

use crate::middleware::current_request_id;
use axum::{
    extract::multipart::{MultipartError, MultipartRejection},
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cidgate_core::CoreError;
use serde::Serialize;
use thiserror::Error;

/// Gateway error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidRequest,
    InvalidCid,
    EntityTooLarge,
    NoSuchUpload,
    NoSuchPeer,
    SlowDown,
    StorageFailure,
    RetrievalFailure,
    StreamError,
    ConnectionFailure,
    ProbeFailed,
    InternalError,
}

impl ErrorCode {
    /// Get the error code string
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "InvalidRequest",
            Self::InvalidCid => "InvalidCid",
            Self::EntityTooLarge => "EntityTooLarge",
            Self::NoSuchUpload => "NoSuchUpload",
            Self::NoSuchPeer => "NoSuchPeer",
            Self::SlowDown => "SlowDown",
            Self::StorageFailure => "StorageFailure",
            Self::RetrievalFailure => "RetrievalFailure",
            Self::StreamError => "StreamError",
            Self::ConnectionFailure => "ConnectionFailure",
            Self::ProbeFailed => "ProbeFailed",
            Self::InternalError => "InternalError",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest | Self::InvalidCid => StatusCode::BAD_REQUEST,
            Self::EntityTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NoSuchUpload | Self::NoSuchPeer => StatusCode::NOT_FOUND,
            Self::SlowDown => StatusCode::TOO_MANY_REQUESTS,
            Self::StorageFailure
            | Self::RetrievalFailure
            | Self::StreamError
            | Self::ConnectionFailure
            | Self::ProbeFailed
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{message}")]
    Gateway { code: ErrorCode, message: String },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Create an error with an explicit code
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Gateway {
            code,
            message: message.into(),
        }
    }

    /// Shorthand for a 400 InvalidRequest
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    /// Get the error code
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::Gateway { code, .. } => *code,
            Self::Internal(_) => ErrorCode::InternalError,
            Self::Core(e) => match e {
                CoreError::InvalidRequest(_) => ErrorCode::InvalidRequest,
                CoreError::InvalidCid(_) => ErrorCode::InvalidCid,
                CoreError::StorageFailure { .. } | CoreError::Io(_) => ErrorCode::StorageFailure,
                CoreError::RetrievalFailure { .. } => ErrorCode::RetrievalFailure,
                CoreError::StreamError(_) => ErrorCode::StreamError,
                CoreError::ConnectionFailure { .. } => ErrorCode::ConnectionFailure,
                CoreError::ProbeFailed { .. } => ErrorCode::ProbeFailed,
                CoreError::SessionNotFound(_) => ErrorCode::NoSuchUpload,
                CoreError::PeerNotFound(_) => ErrorCode::NoSuchPeer,
            },
        }
    }

    /// Message for the response body, including the store's cause
    fn message(&self) -> String {
        match self {
            Self::Core(CoreError::StorageFailure { message, source }) => {
                format!("{}: {}", message, source)
            }
            other => other.to_string(),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return Self::new(ErrorCode::EntityTooLarge, err.body_text());
        }
        Self::invalid(err.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(err: MultipartRejection) -> Self {
        Self::invalid(err.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(err: QueryRejection) -> Self {
        Self::invalid(err.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        Self::invalid(err.body_text())
    }
}

/// JSON error body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status_code: u16,
    pub error: &'static str,
    pub message: String,
    pub request_id: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.error_code();
        let status = code.status_code();
        let request_id = current_request_id().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        if status.is_server_error() {
            tracing::error!(code = code.as_str(), error = %self.message(), request_id = %request_id, "Request failed");
        } else {
            tracing::debug!(code = code.as_str(), error = %self.message(), request_id = %request_id, "Request rejected");
        }

        let body = ErrorBody {
            status_code: status.as_u16(),
            error: code.as_str(),
            message: self.message(),
            request_id,
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cidgate_store::StoreError;
    use rstest::rstest;

    #[rstest]
    #[case(CoreError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST)]
    #[case(CoreError::InvalidCid("x".into()), StatusCode::BAD_REQUEST)]
    #[case(CoreError::SessionNotFound("x".into()), StatusCode::NOT_FOUND)]
    #[case(CoreError::storage("x", StoreError::Offline), StatusCode::INTERNAL_SERVER_ERROR)]
    #[case(CoreError::ProbeFailed { peer: "p".into(), reason: "r".into() }, StatusCode::INTERNAL_SERVER_ERROR)]
    #[case(CoreError::ConnectionFailure { address: "a".into(), reason: "r".into() }, StatusCode::INTERNAL_SERVER_ERROR)]
    #[case(CoreError::StreamError("cut".into()), StatusCode::INTERNAL_SERVER_ERROR)]
    #[case(CoreError::PeerNotFound("p".into()), StatusCode::NOT_FOUND)]
    fn test_core_error_status(#[case] err: CoreError, #[case] status: StatusCode) {
        assert_eq!(ApiError::from(err).error_code().status_code(), status);
    }

    #[tokio::test]
    async fn test_error_body_shape() {
        let response = ApiError::invalid("Missing required fields").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["statusCode"], 400);
        assert_eq!(body["error"], "InvalidRequest");
        assert_eq!(body["message"], "Missing required fields");
        assert!(!body["requestId"].as_str().unwrap().is_empty());
    }

    #[test]
    fn test_storage_failure_message_includes_cause() {
        let err = ApiError::from(CoreError::storage("failed to pin", StoreError::Offline));
        assert_eq!(err.message(), "failed to pin: content store is offline");
    }
}
