use std::fmt;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimited,
    SafetyBlocked,
    InvalidInput,
    AuthError,
    NetworkError,
    NoImageReturned,
    DimensionMismatch,
    Cancelled,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::SafetyBlocked => "safety_blocked",
            Self::InvalidInput => "invalid_input",
            Self::AuthError => "auth_error",
            Self::NetworkError => "network_error",
            Self::NoImageReturned => "no_image_returned",
            Self::DimensionMismatch => "dimension_mismatch",
            Self::Cancelled => "cancelled",
            Self::Unknown => "unknown",
        }
    }

    /// Kinds a caller can reasonably retry with the same photo.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::NetworkError)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The single error surfaced to callers of the hair pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct TransformError {
    pub kind: ErrorKind,
    pub message: String,
}

impl TransformError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn cancelled() -> Self {
        Self::new(
            ErrorKind::Cancelled,
            "hair transformation was abandoned by the caller",
        )
    }
}

/// Runs raster work on the blocking pool so the async workers stay free.
pub(crate) async fn run_blocking<T, F>(label: &'static str, work: F) -> Result<T, TransformError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|join_error| {
        TransformError::new(ErrorKind::Unknown, format!("{label} task failed: {join_error}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_as_snake_case() {
        let value = serde_json::to_value(ErrorKind::NoImageReturned).expect("kind serializes");
        assert_eq!(value, serde_json::json!("no_image_returned"));
        assert_eq!(ErrorKind::SafetyBlocked.to_string(), "safety_blocked");
    }

    #[test]
    fn only_transient_kinds_are_retryable() {
        assert!(ErrorKind::RateLimited.is_retryable());
        assert!(ErrorKind::NetworkError.is_retryable());
        assert!(!ErrorKind::SafetyBlocked.is_retryable());
        assert!(!ErrorKind::InvalidInput.is_retryable());
        assert!(!ErrorKind::NoImageReturned.is_retryable());
    }

    #[test]
    fn transform_error_display_includes_kind() {
        let err = TransformError::new(ErrorKind::AuthError, "missing key");
        assert_eq!(err.to_string(), "auth_error: missing key");
    }
}
