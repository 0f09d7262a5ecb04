//! Error types for the streaming core
//!
//! HTTP status mapping lives only at the edge (`api::error_response`);
//! everything else in this crate returns `Result<T, StreamingError>`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

/// Why a grant token failed validation (spec §7, `TokenInvalid`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenInvalidReason {
    Expired,
    WrongTrack,
    WrongVoice,
    ContentUpdated,
    BadSignature,
    Malformed,
}

impl TokenInvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::WrongTrack => "wrong-track",
            Self::WrongVoice => "wrong-voice",
            Self::ContentUpdated => "content-updated",
            Self::BadSignature => "bad-signature",
            Self::Malformed => "malformed",
        }
    }
}

impl std::fmt::Display for TokenInvalidReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for the streaming core.
#[derive(Debug, Error)]
pub enum StreamingError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Access denied: {0}")]
    TierDenied(String),

    #[error("Busy, retry in {retry_after_secs}s: {reason}")]
    Busy { reason: String, retry_after_secs: u64 },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad input: {0}")]
    BadInput(String),

    #[error("Storage failure: {0}")]
    StorageFailure(String),

    #[error("Transcode failure: {0}")]
    TranscodeFailure(String),

    #[error("Lock timeout: {0}")]
    LockTimeout(String),

    #[error("Invalid token: {reason}")]
    TokenInvalid { reason: TokenInvalidReason },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl From<streaming_common::Error> for StreamingError {
    fn from(e: streaming_common::Error) -> Self {
        match e {
            streaming_common::Error::Database(e) => Self::Database(e),
            streaming_common::Error::Io(e) => Self::Io(e),
            streaming_common::Error::Config(s) => Self::Config(s),
            streaming_common::Error::NotFound(s) => Self::NotFound(s),
            streaming_common::Error::InvalidInput(s) => Self::BadInput(s),
            streaming_common::Error::Internal(s) => Self::Other(anyhow::anyhow!(s)),
        }
    }
}

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, StreamingError>;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    required_tier: Option<String>,
}

impl IntoResponse for StreamingError {
    /// Maps each error kind to the HTTP status documented in spec §7.
    fn into_response(self) -> Response {
        let (status, reason) = match &self {
            StreamingError::NotFound(_) => (StatusCode::NOT_FOUND, None),
            StreamingError::TierDenied(msg) => {
                return (
                    StatusCode::FORBIDDEN,
                    axum::Json(ErrorBody {
                        error: self.to_string(),
                        reason: None,
                        required_tier: Some(msg.clone()),
                    }),
                )
                    .into_response();
            }
            StreamingError::Busy {
                retry_after_secs, ..
            } => {
                let mut response = (StatusCode::ACCEPTED, axum::Json(ErrorBody {
                    error: self.to_string(),
                    reason: None,
                    required_tier: None,
                }))
                    .into_response();
                response.headers_mut().insert(
                    axum::http::header::RETRY_AFTER,
                    axum::http::HeaderValue::from_str(&retry_after_secs.to_string())
                        .expect("retry_after_secs is ascii digits"),
                );
                return response;
            }
            StreamingError::Conflict(_) => (StatusCode::CONFLICT, None),
            StreamingError::BadInput(_) => (StatusCode::BAD_REQUEST, None),
            StreamingError::TokenInvalid { reason } => {
                (StatusCode::FORBIDDEN, Some(reason.to_string()))
            }
            StreamingError::LockTimeout(_) => (StatusCode::CONFLICT, None),
            StreamingError::Database(_)
            | StreamingError::Serde(_)
            | StreamingError::Io(_)
            | StreamingError::StorageFailure(_)
            | StreamingError::TranscodeFailure(_)
            | StreamingError::Config(_)
            | StreamingError::Other(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };

        (
            status,
            axum::Json(ErrorBody {
                error: self.to_string(),
                reason,
                required_tier: None,
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_invalid_reason_strings_are_stable() {
        assert_eq!(TokenInvalidReason::ContentUpdated.as_str(), "content-updated");
        assert_eq!(TokenInvalidReason::Expired.as_str(), "expired");
    }
}
