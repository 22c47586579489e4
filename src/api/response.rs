use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::error;

use crate::api::error::{status_for, ApiError, ErrorKind};
use crate::pipeline::error::TransformError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiEnvelope<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiError>,
}

pub type ApiJson<T> = (StatusCode, Json<ApiEnvelope<T>>);

pub fn success<T>(payload: T) -> ApiJson<T>
where
    T: Serialize,
{
    (
        StatusCode::OK,
        Json(ApiEnvelope {
            ok: true,
            data: Some(payload),
            error: None,
        }),
    )
}

pub fn failure<T>(status: StatusCode, error: ApiError) -> ApiJson<T> {
    (
        status,
        Json(ApiEnvelope {
            ok: false,
            data: None,
            error: Some(error),
        }),
    )
}

pub fn transform_failure<T>(error: &TransformError) -> ApiJson<T> {
    failure(status_for(error.kind), ApiError::from(error))
}

/// Logs the detail and returns a sanitized 500.
pub fn internal_error<T>(detail: impl Into<String>) -> ApiJson<T> {
    let detail = detail.into();
    error!(detail = %detail, "internal api error");
    failure(
        StatusCode::INTERNAL_SERVER_ERROR,
        ApiError::new(
            ErrorKind::Infra,
            "internal_error",
            "Internal server error",
            None::<Value>,
        ),
    )
}
