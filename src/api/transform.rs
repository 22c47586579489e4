use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::response::{internal_error, success, transform_failure, ApiJson};
use crate::api::server::AppState;
use crate::pipeline::boundary::{BoundarySource, FaceBoundary};
use crate::pipeline::error::TransformError;
use crate::pipeline::orchestrator::{PipelineState, TransformStrategy};
use crate::pipeline::photo::Photo;
use crate::pipeline::style::{HairVolume, StyleDescriptor};

#[derive(Debug, Clone, Deserialize)]
pub struct TransformHairInput {
    pub photo_base64: String,
    #[serde(default)]
    pub style: StyleInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StyleInput {
    #[serde(default)]
    pub description: String,
    pub color: Option<String>,
    pub volume: Option<String>,
    pub reference_base64: Option<String>,
    pub strategy: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransformHairOutput {
    pub request_id: String,
    pub image_base64: String,
    pub width: u32,
    pub height: u32,
    pub strategy: TransformStrategy,
    pub boundary_source: BoundarySource,
    pub boundary: FaceBoundary,
    pub transitions: Vec<PipelineState>,
}

pub async fn transform_hair_handler(
    State(state): State<AppState>,
    payload: Result<Json<TransformHairInput>, JsonRejection>,
) -> ApiJson<TransformHairOutput> {
    let Json(input) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            return transform_failure(&TransformError::invalid_input(format!(
                "request body is not a valid transform request: {}",
                rejection.body_text()
            )))
        }
    };

    let decoded = tokio::task::spawn_blocking(move || decode_input(input)).await;
    let (photo, style) = match decoded {
        Ok(Ok(parsed)) => parsed,
        Ok(Err(error)) => return transform_failure(&error),
        Err(join_error) => return internal_error(format!("request decode task failed: {join_error}")),
    };

    let result = match state.pipeline.transform_hair(&photo, &style).await {
        Ok(result) => result,
        Err(error) => return transform_failure(&error),
    };

    let output = result.photo.clone();
    let encoded = tokio::task::spawn_blocking(move || output.encode_png()).await;
    let png = match encoded {
        Ok(Ok(png)) => png,
        Ok(Err(error)) => return internal_error(format!("result encode failed: {error}")),
        Err(join_error) => return internal_error(format!("result encode task failed: {join_error}")),
    };
    debug!(request_id = %result.request_id, png_bytes = png.len(), "transform result encoded");

    success(TransformHairOutput {
        request_id: result.request_id,
        image_base64: BASE64_STANDARD.encode(png),
        width: result.photo.width(),
        height: result.photo.height(),
        strategy: result.strategy,
        boundary_source: result.boundary_source,
        boundary: result.boundary,
        transitions: result.transitions,
    })
}

fn decode_input(input: TransformHairInput) -> Result<(Photo, StyleDescriptor), TransformError> {
    let photo = decode_photo_field("photo_base64", input.photo_base64.as_str())?;
    let style = input.style;
    let reference = style
        .reference_base64
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|raw| decode_photo_field("style.reference_base64", raw))
        .transpose()?;
    let volume = style
        .volume
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|raw| {
            HairVolume::parse(raw).ok_or_else(|| {
                TransformError::invalid_input(format!("unknown hair volume '{raw}'"))
            })
        })
        .transpose()?;
    let strategy = style
        .strategy
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|raw| {
            TransformStrategy::parse(raw).ok_or_else(|| {
                TransformError::invalid_input(format!("unknown strategy '{raw}'"))
            })
        })
        .transpose()?;

    Ok((
        photo,
        StyleDescriptor {
            description: style.description,
            color: style.color,
            volume,
            reference,
            strategy,
        },
    ))
}

fn decode_photo_field(field: &str, raw: &str) -> Result<Photo, TransformError> {
    let trimmed = raw.trim();
    // Accept data URLs as pasted from a browser.
    let b64 = match trimmed.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => trimmed,
    };
    let bytes = BASE64_STANDARD
        .decode(b64.as_bytes())
        .map_err(|e| TransformError::invalid_input(format!("{field} is not valid base64: {e}")))?;
    Photo::decode(bytes.as_slice())
        .map_err(|e| TransformError::invalid_input(format!("{field}: {e}")))
}
