use axum::http::StatusCode;
use serde::Serialize;
use serde_json::Value;

use crate::pipeline::error::{ErrorKind as PipelineErrorKind, TransformError};

/// Coarse error family shown to HTTP clients; `code` carries the exact kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Provider,
    Infra,
    Policy,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(
        kind: ErrorKind,
        code: impl Into<String>,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            details,
        }
    }
}

impl From<&TransformError> for ApiError {
    fn from(error: &TransformError) -> Self {
        let kind = match error.kind {
            PipelineErrorKind::InvalidInput => ErrorKind::Validation,
            PipelineErrorKind::SafetyBlocked => ErrorKind::Policy,
            PipelineErrorKind::RateLimited
            | PipelineErrorKind::AuthError
            | PipelineErrorKind::NetworkError
            | PipelineErrorKind::NoImageReturned => ErrorKind::Provider,
            PipelineErrorKind::DimensionMismatch | PipelineErrorKind::Cancelled => ErrorKind::Infra,
            PipelineErrorKind::Unknown => ErrorKind::Unknown,
        };
        let details = error
            .kind
            .is_retryable()
            .then(|| serde_json::json!({ "retryable": true }));
        Self::new(kind, error.kind.as_str(), error.message.clone(), details)
    }
}

pub fn status_for(kind: PipelineErrorKind) -> StatusCode {
    match kind {
        PipelineErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        PipelineErrorKind::SafetyBlocked => StatusCode::UNPROCESSABLE_ENTITY,
        PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        PipelineErrorKind::AuthError
        | PipelineErrorKind::NetworkError
        | PipelineErrorKind::NoImageReturned => StatusCode::BAD_GATEWAY,
        PipelineErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        PipelineErrorKind::DimensionMismatch | PipelineErrorKind::Unknown => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safety_blocks_are_policy_errors() {
        let error = TransformError::new(PipelineErrorKind::SafetyBlocked, "blocked");
        let api = ApiError::from(&error);

        assert_eq!(api.kind, ErrorKind::Policy);
        assert_eq!(api.code, "safety_blocked");
        assert_eq!(api.details, None);
        assert_eq!(status_for(error.kind), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn transient_provider_errors_are_flagged_retryable() {
        let api = ApiError::from(&TransformError::new(PipelineErrorKind::RateLimited, "slow"));

        assert_eq!(api.kind, ErrorKind::Provider);
        assert_eq!(api.details, Some(serde_json::json!({ "retryable": true })));
        assert_eq!(status_for(PipelineErrorKind::RateLimited), StatusCode::TOO_MANY_REQUESTS);
    }
}
